//! Owning heap for every runtime object, with mark-and-sweep reclamation.
//!
//! Closures and records form cycles (a captured frame can hold a variable
//! whose value closes over that same frame), so reference counting cannot
//! reclaim them. Every inter-object edge is a typed arena index instead.

use std::collections::{HashMap, HashSet};

use bit_set::BitSet;
use log::debug;

use super::value::{Frame, Function, GlobalInfo, Record, Value};

macro_rules! handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub(super) struct $name(usize);
    };
}

handle!(ValueRef);
handle!(RecordRef);
handle!(FunctionRef);
handle!(FrameRef);

/// Edge in the object graph, used as a collection root and as a worklist
/// entry while tracing.
#[derive(Debug, Clone, Copy)]
pub(super) enum HeapRef {
    Value(ValueRef),
    Record(RecordRef),
    Function(FunctionRef),
    Frame(FrameRef),
}

struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, object: T) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(object);
                index
            }
            None => {
                self.slots.push(Some(object));
                self.slots.len() - 1
            }
        }
    }

    fn get(&self, index: usize) -> &T {
        self.slots[index].as_ref().expect("stale arena handle")
    }

    fn get_mut(&mut self, index: usize) -> &mut T {
        self.slots[index].as_mut().expect("stale arena handle")
    }

    fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Drop every slot not present in `marked`; returns the number freed.
    fn sweep(&mut self, marked: &BitSet) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !marked.contains(index) {
                *slot = None;
                self.free.push(index);
                freed += 1;
            }
        }
        freed
    }
}

pub(super) struct Heap {
    values: Arena<Value>,
    records: Arena<Record>,
    functions: Arena<Function>,
    frames: Arena<Frame>,
    live_bytes: usize,
    limit_bytes: usize,
}

impl Heap {
    pub(super) fn with_limit(limit_bytes: usize) -> Self {
        Self {
            values: Arena::new(),
            records: Arena::new(),
            functions: Arena::new(),
            frames: Arena::new(),
            live_bytes: 0,
            limit_bytes,
        }
    }

    pub(super) fn would_exceed(&self, extra: usize) -> bool {
        self.live_bytes + extra > self.limit_bytes
    }

    pub(super) fn live_objects(&self) -> usize {
        self.values.live_count()
            + self.records.live_count()
            + self.functions.live_count()
            + self.frames.live_count()
    }

    pub(super) fn alloc_value(&mut self, value: Value) -> ValueRef {
        self.live_bytes += value.approx_size();
        ValueRef(self.values.insert(value))
    }

    pub(super) fn alloc_record(&mut self, record: Record) -> RecordRef {
        self.live_bytes += record.approx_size();
        RecordRef(self.records.insert(record))
    }

    pub(super) fn alloc_function(&mut self, function: Function) -> FunctionRef {
        self.live_bytes += function.approx_size();
        FunctionRef(self.functions.insert(function))
    }

    pub(super) fn alloc_frame(&mut self, frame: Frame) -> FrameRef {
        self.live_bytes += frame.approx_size();
        FrameRef(self.frames.insert(frame))
    }

    /// Allocate the outermost frame, whose `GlobalInfo` points at itself.
    pub(super) fn alloc_global_frame(&mut self, names: HashSet<String>) -> FrameRef {
        let handle = self.alloc_frame(Frame {
            bindings: HashMap::new(),
            parent: None,
            global: GlobalInfo {
                names,
                frame: FrameRef(0),
            },
        });
        self.frames.get_mut(handle.0).global.frame = handle;
        handle
    }

    pub(super) fn value(&self, handle: ValueRef) -> &Value {
        self.values.get(handle.0)
    }

    pub(super) fn record(&self, handle: RecordRef) -> &Record {
        self.records.get(handle.0)
    }

    pub(super) fn record_mut(&mut self, handle: RecordRef) -> &mut Record {
        self.records.get_mut(handle.0)
    }

    pub(super) fn function(&self, handle: FunctionRef) -> &Function {
        self.functions.get(handle.0)
    }

    pub(super) fn frame(&self, handle: FrameRef) -> &Frame {
        self.frames.get(handle.0)
    }

    pub(super) fn frame_mut(&mut self, handle: FrameRef) -> &mut Frame {
        self.frames.get_mut(handle.0)
    }

    /// Trace from `roots` and release everything unreached. The live-byte
    /// watermark is recomputed from the survivors, which also accounts for
    /// records and frames that grew since allocation.
    pub(super) fn collect(&mut self, roots: &[HeapRef]) {
        let mut marked_values = BitSet::with_capacity(self.values.slots.len());
        let mut marked_records = BitSet::with_capacity(self.records.slots.len());
        let mut marked_functions = BitSet::with_capacity(self.functions.slots.len());
        let mut marked_frames = BitSet::with_capacity(self.frames.slots.len());

        let mut worklist: Vec<HeapRef> = roots.to_vec();
        while let Some(edge) = worklist.pop() {
            match edge {
                HeapRef::Value(handle) => {
                    if !marked_values.insert(handle.0) {
                        continue;
                    }
                    match self.values.get(handle.0) {
                        Value::Record(record) => worklist.push(HeapRef::Record(*record)),
                        Value::Function(function) => worklist.push(HeapRef::Function(*function)),
                        _ => {}
                    }
                }
                HeapRef::Record(handle) => {
                    if !marked_records.insert(handle.0) {
                        continue;
                    }
                    for &(_, value) in &self.records.get(handle.0).fields {
                        worklist.push(HeapRef::Value(value));
                    }
                }
                HeapRef::Function(handle) => {
                    if !marked_functions.insert(handle.0) {
                        continue;
                    }
                    worklist.push(HeapRef::Frame(self.functions.get(handle.0).captured));
                }
                HeapRef::Frame(handle) => {
                    if !marked_frames.insert(handle.0) {
                        continue;
                    }
                    let frame = self.frames.get(handle.0);
                    for &value in frame.bindings.values() {
                        worklist.push(HeapRef::Value(value));
                    }
                    if let Some(parent) = frame.parent {
                        worklist.push(HeapRef::Frame(parent));
                    }
                    worklist.push(HeapRef::Frame(frame.global.frame));
                }
            }
        }

        let freed = self.values.sweep(&marked_values)
            + self.records.sweep(&marked_records)
            + self.functions.sweep(&marked_functions)
            + self.frames.sweep(&marked_frames);

        self.live_bytes = self.recompute_live_bytes();
        debug!(
            "collected {freed} objects, {} live, {} bytes",
            self.live_objects(),
            self.live_bytes
        );
    }

    fn recompute_live_bytes(&self) -> usize {
        let values: usize = self
            .values
            .slots
            .iter()
            .flatten()
            .map(Value::approx_size)
            .sum();
        let records: usize = self
            .records
            .slots
            .iter()
            .flatten()
            .map(Record::approx_size)
            .sum();
        let functions: usize = self
            .functions
            .slots
            .iter()
            .flatten()
            .map(Function::approx_size)
            .sum();
        let frames: usize = self
            .frames
            .slots
            .iter()
            .flatten()
            .map(Frame::approx_size)
            .sum();
        values + records + functions + frames
    }
}

#[cfg(test)]
mod tests {
    use super::super::value::FunctionBody;
    use super::*;

    fn test_heap() -> Heap {
        Heap::with_limit(usize::MAX)
    }

    #[test]
    fn collect_without_roots_frees_everything() {
        let mut heap = test_heap();
        heap.alloc_value(Value::Int(1));
        heap.alloc_value(Value::Str("hello".to_string()));
        assert_eq!(heap.live_objects(), 2);

        heap.collect(&[]);
        assert_eq!(heap.live_objects(), 0);
        assert_eq!(heap.live_bytes, 0);
    }

    #[test]
    fn rooted_objects_survive_collection() {
        let mut heap = test_heap();
        let keep = heap.alloc_value(Value::Int(1));
        heap.alloc_value(Value::Int(2));

        heap.collect(&[HeapRef::Value(keep)]);
        assert_eq!(heap.live_objects(), 1);
        assert!(matches!(heap.value(keep), Value::Int(1)));
    }

    #[test]
    fn reclaims_mutually_referencing_records() {
        let mut heap = test_heap();
        let a = heap.alloc_record(Record::default());
        let b = heap.alloc_record(Record::default());
        let a_value = heap.alloc_value(Value::Record(a));
        let b_value = heap.alloc_value(Value::Record(b));
        heap.record_mut(a).set("other", b_value);
        heap.record_mut(b).set("other", a_value);

        heap.collect(&[]);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn reclaims_frame_closure_cycle() {
        let mut heap = test_heap();
        let global = heap.alloc_frame(Frame {
            bindings: HashMap::new(),
            parent: None,
            global: GlobalInfo {
                names: HashSet::new(),
                frame: FrameRef(0),
            },
        });
        let frame = heap.alloc_frame(Frame {
            bindings: HashMap::new(),
            parent: Some(global),
            global: GlobalInfo {
                names: HashSet::new(),
                frame: global,
            },
        });
        let function = heap.alloc_function(Function {
            captured: frame,
            params: vec![],
            body: FunctionBody::Builtin(crate::builtins::BuiltinFunction::Print),
        });
        let closure = heap.alloc_value(Value::Function(function));
        heap.frame_mut(frame).bindings.insert("f".to_string(), closure);

        // The frame holds the closure which captures the frame; with the
        // global frame rooted, the cycle alone must still be reclaimed.
        heap.collect(&[HeapRef::Frame(global)]);
        assert_eq!(heap.live_objects(), 1);

        heap.collect(&[]);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn tracing_follows_record_fields_transitively() {
        let mut heap = test_heap();
        let inner = heap.alloc_record(Record::default());
        let payload = heap.alloc_value(Value::Int(7));
        heap.record_mut(inner).set("x", payload);
        let inner_value = heap.alloc_value(Value::Record(inner));
        let outer = heap.alloc_record(Record::default());
        heap.record_mut(outer).set("inner", inner_value);

        heap.collect(&[HeapRef::Record(outer)]);
        assert_eq!(heap.live_objects(), 4);
        assert!(matches!(heap.value(payload), Value::Int(7)));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = test_heap();
        heap.alloc_value(Value::Int(1));
        heap.collect(&[]);
        let reused = heap.alloc_value(Value::Int(2));
        assert_eq!(reused, ValueRef(0));
    }
}
