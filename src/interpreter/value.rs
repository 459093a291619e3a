use std::collections::{HashMap, HashSet};
use std::mem;
use std::rc::Rc;

use crate::ast::Block;
use crate::builtins::BuiltinFunction;

use super::heap::{FrameRef, FunctionRef, RecordRef, ValueRef};

/// A runtime value. Variables and record fields hold `ValueRef` handles, so
/// assignment rebinds a reference; it never copies a payload.
#[derive(Debug, Clone)]
pub(super) enum Value {
    None,
    Bool(bool),
    Int(i32),
    Str(String),
    Record(RecordRef),
    Function(FunctionRef),
}

impl Value {
    pub(super) fn approx_size(&self) -> usize {
        let payload = match self {
            Value::Str(s) => s.capacity(),
            _ => 0,
        };
        mem::size_of::<Value>() + payload
    }
}

/// Ordered field list. Lookup is first-match on insertion order; writes
/// overwrite an existing binding in place and append otherwise.
#[derive(Debug, Default)]
pub(super) struct Record {
    pub(super) fields: Vec<(String, ValueRef)>,
}

impl Record {
    pub(super) fn get(&self, name: &str) -> Option<ValueRef> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|&(_, value)| value)
    }

    pub(super) fn set(&mut self, name: &str, value: ValueRef) {
        for (field, slot) in &mut self.fields {
            if field == name {
                *slot = value;
                return;
            }
        }
        self.fields.push((name.to_string(), value));
    }

    pub(super) fn approx_size(&self) -> usize {
        let entries: usize = self
            .fields
            .iter()
            .map(|(name, _)| name.capacity() + mem::size_of::<(String, ValueRef)>())
            .sum();
        mem::size_of::<Record>() + entries
    }
}

#[derive(Debug, Clone)]
pub(super) enum FunctionBody {
    User(Rc<Block>),
    Builtin(BuiltinFunction),
}

/// A closure: the lexical parent frame at declaration time plus the
/// parameter list and body. Builtins capture the global frame.
#[derive(Debug)]
pub(super) struct Function {
    pub(super) captured: FrameRef,
    pub(super) params: Vec<String>,
    pub(super) body: FunctionBody,
}

impl Function {
    pub(super) fn approx_size(&self) -> usize {
        let params: usize = self
            .params
            .iter()
            .map(|name| name.capacity() + mem::size_of::<String>())
            .sum();
        mem::size_of::<Function>() + params
    }
}

/// Names declared `global` for a frame, and the frame they resolve in.
#[derive(Debug, Clone)]
pub(super) struct GlobalInfo {
    pub(super) names: HashSet<String>,
    pub(super) frame: FrameRef,
}

/// One activation: name bindings, the lexical parent, and the global-name
/// view installed at function entry.
#[derive(Debug)]
pub(super) struct Frame {
    pub(super) bindings: HashMap<String, ValueRef>,
    pub(super) parent: Option<FrameRef>,
    pub(super) global: GlobalInfo,
}

impl Frame {
    pub(super) fn is_global(&self, name: &str) -> bool {
        self.global.names.contains(name)
    }

    pub(super) fn approx_size(&self) -> usize {
        let bindings: usize = self
            .bindings
            .keys()
            .map(|name| name.capacity() + mem::size_of::<(String, ValueRef)>())
            .sum();
        let globals: usize = self
            .global
            .names
            .iter()
            .map(|name| name.capacity() + mem::size_of::<String>())
            .sum();
        mem::size_of::<Frame>() + bindings + globals
    }
}
