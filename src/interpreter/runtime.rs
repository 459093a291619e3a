use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};
use std::mem;
use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{
    AssignTarget, BinaryOperator, Block, Expression, Program, Statement, UnaryOperator,
};
use crate::builtins::BuiltinFunction;

use super::error::{ExecResult, InterpreterError};
use super::heap::{FrameRef, FunctionRef, Heap, HeapRef, ValueRef};
use super::value::{Frame, Function, FunctionBody, GlobalInfo, Record, Value};

/// Control-flow marker for statement execution.
#[derive(Clone, Copy)]
pub(super) enum Flow {
    Continue,
    Return(ValueRef),
}

/// The evaluator: a frame stack over the traced heap, plus the I/O streams
/// the builtins talk to.
pub(super) struct Runtime<'io> {
    heap: Heap,
    stack: Vec<FrameRef>,
    /// Scratch roots: every intermediate result of the statement currently
    /// executing. Collection can hit on any allocation, so a value is only
    /// safe to hold across an allocation while it is in here or in a frame.
    temps: Vec<ValueRef>,
    none: ValueRef,
    out: &'io mut dyn Write,
    input: &'io mut dyn BufRead,
}

impl<'io> Runtime<'io> {
    pub(super) fn new(
        memory_limit: usize,
        out: &'io mut dyn Write,
        input: &'io mut dyn BufRead,
    ) -> Self {
        let mut heap = Heap::with_limit(memory_limit);

        let mut reserved: HashSet<String> = BuiltinFunction::all()
            .iter()
            .map(|builtin| builtin.name().to_string())
            .collect();
        reserved.insert("None".to_string());
        let global = heap.alloc_global_frame(reserved);

        for builtin in BuiltinFunction::all() {
            let function = heap.alloc_function(Function {
                captured: global,
                params: builtin.params().iter().map(|s| s.to_string()).collect(),
                body: FunctionBody::Builtin(builtin),
            });
            let value = heap.alloc_value(Value::Function(function));
            heap.frame_mut(global)
                .bindings
                .insert(builtin.name().to_string(), value);
        }

        let none = heap.alloc_value(Value::None);
        heap.frame_mut(global)
            .bindings
            .insert("None".to_string(), none);

        Self {
            heap,
            stack: vec![global],
            temps: Vec::new(),
            none,
            out,
            input,
        }
    }

    pub(super) fn run(&mut self, program: &Program) -> ExecResult<()> {
        debug!("interpreting {} top-level statements", program.statements.len());
        for statement in &program.statements {
            match self.exec_statement(statement)? {
                Flow::Continue => {}
                Flow::Return(_) => break,
            }
        }
        Ok(())
    }

    // ---- statements ----------------------------------------------------

    fn exec_block(&mut self, block: &Block) -> ExecResult<Flow> {
        for statement in &block.statements {
            if let Flow::Return(value) = self.exec_statement(statement)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Continue)
    }

    fn exec_statement(&mut self, statement: &Statement) -> ExecResult<Flow> {
        let mark = self.temps.len();
        let flow = self.exec_statement_inner(statement)?;
        self.temps.truncate(mark);
        // A propagating return value is a collection root until the caller
        // stores it somewhere reachable.
        if let Flow::Return(value) = flow {
            self.temps.push(value);
        }
        Ok(flow)
    }

    fn exec_statement_inner(&mut self, statement: &Statement) -> ExecResult<Flow> {
        match statement {
            Statement::Assign { target, value } => {
                self.exec_assign(target, value)?;
                Ok(Flow::Continue)
            }
            // Declarative only; its effect was captured at function entry.
            Statement::Global { .. } => Ok(Flow::Continue),
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                if self.eval_condition(condition)? {
                    self.exec_block(then_body)
                } else if let Some(else_body) = else_body {
                    self.exec_block(else_body)
                } else {
                    Ok(Flow::Continue)
                }
            }
            Statement::While { condition, body } => {
                let mark = self.temps.len();
                while self.eval_condition(condition)? {
                    if let Flow::Return(value) = self.exec_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                    self.temps.truncate(mark);
                }
                Ok(Flow::Continue)
            }
            Statement::Return(expression) => {
                let value = self.eval_expression(expression)?;
                Ok(Flow::Return(value))
            }
            Statement::Expr(expression) => {
                self.eval_expression(expression)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn exec_assign(&mut self, target: &AssignTarget, value: &Expression) -> ExecResult<()> {
        match target {
            AssignTarget::Name(name) => {
                let value = self.eval_expression(value)?;
                let frame = self.write_target(name);
                trace!("binding '{name}'");
                self.heap.frame_mut(frame).bindings.insert(name.clone(), value);
            }
            AssignTarget::Field { object, name } => {
                let object = self.eval_expression(object)?;
                let value = self.eval_expression(value)?;
                let Value::Record(record) = *self.heap.value(object) else {
                    return Err(InterpreterError::IllegalCast);
                };
                self.heap.record_mut(record).set(name, value);
            }
            AssignTarget::Index { object, index } => {
                let object = self.eval_expression(object)?;
                let index = self.eval_expression(index)?;
                let name = self.render(index);
                let value = self.eval_expression(value)?;
                let Value::Record(record) = *self.heap.value(object) else {
                    return Err(InterpreterError::IllegalCast);
                };
                self.heap.record_mut(record).set(&name, value);
            }
        }
        Ok(())
    }

    fn eval_condition(&mut self, condition: &Expression) -> ExecResult<bool> {
        let value = self.eval_expression(condition)?;
        match self.heap.value(value) {
            Value::Bool(flag) => Ok(*flag),
            _ => Err(InterpreterError::IllegalCast),
        }
    }

    // ---- expressions ---------------------------------------------------

    fn eval_expression(&mut self, expression: &Expression) -> ExecResult<ValueRef> {
        let value = self.eval_expression_inner(expression)?;
        self.temps.push(value);
        Ok(value)
    }

    fn eval_expression_inner(&mut self, expression: &Expression) -> ExecResult<ValueRef> {
        match expression {
            Expression::Integer(value) => self.new_value(Value::Int(*value)),
            Expression::Boolean(value) => self.new_value(Value::Bool(*value)),
            Expression::String(value) => self.new_value(Value::Str(value.clone())),
            Expression::None => Ok(self.none),
            Expression::Identifier(name) => self.lookup_read(name),
            Expression::BinaryOp { left, op, right } => {
                let left = self.eval_expression(left)?;
                let right = self.eval_expression(right)?;
                self.eval_binary(*op, left, right)
            }
            Expression::UnaryOp { op, operand } => {
                let operand = self.eval_expression(operand)?;
                self.eval_unary(*op, operand)
            }
            Expression::Field { object, name } => {
                let object = self.eval_expression(object)?;
                let Value::Record(record) = *self.heap.value(object) else {
                    return Err(InterpreterError::IllegalCast);
                };
                match self.heap.record(record).get(name) {
                    Some(value) => Ok(value),
                    // A missing field reads as a fresh None, not an error.
                    None => self.new_value(Value::None),
                }
            }
            Expression::Index { object, index } => {
                let object = self.eval_expression(object)?;
                let Value::Record(record) = *self.heap.value(object) else {
                    return Err(InterpreterError::IllegalCast);
                };
                let index = self.eval_expression(index)?;
                let name = self.render(index);
                match self.heap.record(record).get(&name) {
                    Some(value) => Ok(value),
                    None => self.new_value(Value::None),
                }
            }
            Expression::Call { callee, args } => self.eval_call(callee, args),
            Expression::Record { fields } => {
                let mut evaluated = Vec::with_capacity(fields.len());
                for (name, expression) in fields {
                    evaluated.push((name.clone(), self.eval_expression(expression)?));
                }
                self.new_record_value(Record { fields: evaluated })
            }
            Expression::Function { params, body } => self.new_function_value(Function {
                captured: self.top_frame(),
                params: params.clone(),
                body: FunctionBody::User(Rc::clone(body)),
            }),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOperator,
        left: ValueRef,
        right: ValueRef,
    ) -> ExecResult<ValueRef> {
        use BinaryOperator::*;

        if matches!(op, Eq) {
            let equal = self.values_equal(left, right);
            return self.new_value(Value::Bool(equal));
        }

        let left_value = self.heap.value(left).clone();
        let right_value = self.heap.value(right).clone();
        let result = match (op, &left_value, &right_value) {
            (Add, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (Add, Value::Str(a), Value::Str(b)) => Value::Str(format!("{a}{b}")),
            // `+` coerces the non-string side to its display form.
            (Add, Value::Str(a), _) => Value::Str(format!("{a}{}", self.render(right))),
            (Add, _, Value::Str(b)) => Value::Str(format!("{}{b}", self.render(left))),
            (Sub, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(*b)),
            (Mul, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_mul(*b)),
            (Div, Value::Int(_), Value::Int(0)) => {
                return Err(InterpreterError::IllegalArithmetic);
            }
            (Div, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_div(*b)),
            (Lt, Value::Int(a), Value::Int(b)) => Value::Bool(a < b),
            (Gt, Value::Int(a), Value::Int(b)) => Value::Bool(a > b),
            (Leq, Value::Int(a), Value::Int(b)) => Value::Bool(a <= b),
            (Geq, Value::Int(a), Value::Int(b)) => Value::Bool(a >= b),
            (And, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
            (Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),
            _ => return Err(InterpreterError::IllegalCast),
        };
        self.new_value(result)
    }

    fn eval_unary(&mut self, op: UnaryOperator, operand: ValueRef) -> ExecResult<ValueRef> {
        let result = match (op, self.heap.value(operand)) {
            (UnaryOperator::Neg, Value::Int(value)) => Value::Int(value.wrapping_neg()),
            (UnaryOperator::Not, Value::Bool(value)) => Value::Bool(!value),
            _ => return Err(InterpreterError::IllegalCast),
        };
        self.new_value(result)
    }

    /// Equality: by value for scalars and strings, by identity for records,
    /// componentwise identity for functions, `false` across kinds.
    fn values_equal(&self, left: ValueRef, right: ValueRef) -> bool {
        match (self.heap.value(left), self.heap.value(right)) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => self.functions_equal(*a, *b),
            _ => false,
        }
    }

    fn functions_equal(&self, left: FunctionRef, right: FunctionRef) -> bool {
        if left == right {
            return true;
        }
        let a = self.heap.function(left);
        let b = self.heap.function(right);
        let bodies_equal = match (&a.body, &b.body) {
            (FunctionBody::User(x), FunctionBody::User(y)) => Rc::ptr_eq(x, y),
            (FunctionBody::Builtin(x), FunctionBody::Builtin(y)) => x == y,
            _ => false,
        };
        a.captured == b.captured && a.params == b.params && bodies_equal
    }

    // ---- calls ---------------------------------------------------------

    fn eval_call(&mut self, callee: &Expression, args: &[Expression]) -> ExecResult<ValueRef> {
        let target = self.eval_expression(callee)?;
        let Value::Function(function) = *self.heap.value(target) else {
            return Err(InterpreterError::IllegalCast);
        };

        if args.len() != self.heap.function(function).params.len() {
            return Err(InterpreterError::Runtime);
        }

        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.eval_expression(arg)?);
        }

        match self.heap.function(function).body.clone() {
            FunctionBody::Builtin(builtin) => self.call_builtin(builtin, &arg_values),
            FunctionBody::User(body) => self.call_user(function, &body, arg_values),
        }
    }

    fn call_builtin(
        &mut self,
        builtin: BuiltinFunction,
        args: &[ValueRef],
    ) -> ExecResult<ValueRef> {
        trace!("dispatching builtin {}", builtin.name());
        match builtin {
            BuiltinFunction::Print => {
                let rendered = self.render(args[0]);
                writeln!(self.out, "{rendered}").map_err(|_| InterpreterError::Runtime)?;
                self.new_value(Value::None)
            }
            BuiltinFunction::Input => {
                let mut line = String::new();
                self.input
                    .read_line(&mut line)
                    .map_err(|_| InterpreterError::Runtime)?;
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                self.new_value(Value::Str(line))
            }
            BuiltinFunction::Intcast => match self.heap.value(args[0]) {
                Value::Int(value) => {
                    let value = *value;
                    self.new_value(Value::Int(value))
                }
                Value::Str(text) => {
                    let digits = text.strip_prefix('-').unwrap_or(text);
                    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(InterpreterError::IllegalCast);
                    }
                    let value = text
                        .parse::<i32>()
                        .map_err(|_| InterpreterError::IllegalCast)?;
                    self.new_value(Value::Int(value))
                }
                _ => Err(InterpreterError::IllegalCast),
            },
        }
    }

    fn call_user(
        &mut self,
        function: FunctionRef,
        body: &Rc<Block>,
        args: Vec<ValueRef>,
    ) -> ExecResult<ValueRef> {
        let callee = self.heap.function(function);
        let captured = callee.captured;
        let params = callee.params.clone();
        debug!("calling user function, {} args", args.len());

        let globals = collect_globals(body);
        let global_frame = self.heap.frame(captured).global.frame;
        let frame = self.new_frame(Frame {
            bindings: HashMap::new(),
            parent: Some(captured),
            global: GlobalInfo {
                names: globals,
                frame: global_frame,
            },
        })?;

        // The frame must be rooted before pre-binding allocates.
        self.stack.push(frame);
        let result = self.enter_call(frame, captured, &params, body, args);
        self.stack.pop();
        result
    }

    fn enter_call(
        &mut self,
        frame: FrameRef,
        captured: FrameRef,
        params: &[String],
        body: &Rc<Block>,
        args: Vec<ValueRef>,
    ) -> ExecResult<ValueRef> {
        // Assigned names whose writes would not land in an enclosing frame
        // start as locals bound to None; the rest keep targeting the
        // binding they share with the enclosing function.
        for name in collect_assigned(body) {
            if params.contains(&name) || self.heap.frame(frame).is_global(&name) {
                continue;
            }
            if self.enclosing_write_frame(captured, &name).is_some() {
                continue;
            }
            let none = self.new_value(Value::None)?;
            self.heap.frame_mut(frame).bindings.insert(name, none);
        }

        for (param, value) in params.iter().zip(args) {
            self.heap.frame_mut(frame).bindings.insert(param.clone(), value);
        }

        match self.exec_block(body)? {
            Flow::Return(value) => Ok(value),
            Flow::Continue => self.new_value(Value::None),
        }
    }

    // ---- name resolution -----------------------------------------------

    fn top_frame(&self) -> FrameRef {
        *self.stack.last().expect("frame stack is never empty")
    }

    fn lookup_read(&self, name: &str) -> ExecResult<ValueRef> {
        self.resolve_in(self.top_frame(), name)
            .ok_or(InterpreterError::UninitializedVariable)
    }

    /// Walk the frame chain starting at `start`. A frame that declares the
    /// name global short-circuits to the global frame.
    fn resolve_in(&self, start: FrameRef, name: &str) -> Option<ValueRef> {
        let mut cursor = start;
        loop {
            let frame = self.heap.frame(cursor);
            if frame.is_global(name) {
                return self.heap.frame(frame.global.frame).bindings.get(name).copied();
            }
            if let Some(&value) = frame.bindings.get(name) {
                return Some(value);
            }
            cursor = frame.parent?;
        }
    }

    /// Frame that receives a write: the global frame for declared globals,
    /// the nearest enclosing function frame that already binds the name
    /// otherwise. A global-frame binding does not capture undeclared
    /// writes, so those fall back to the current frame.
    fn write_target(&self, name: &str) -> FrameRef {
        let top = self.top_frame();
        self.enclosing_write_frame(top, name).unwrap_or(top)
    }

    fn enclosing_write_frame(&self, start: FrameRef, name: &str) -> Option<FrameRef> {
        let mut cursor = start;
        loop {
            let frame = self.heap.frame(cursor);
            if frame.is_global(name) {
                return Some(frame.global.frame);
            }
            if cursor != frame.global.frame && frame.bindings.contains_key(name) {
                return Some(cursor);
            }
            cursor = frame.parent?;
        }
    }

    // ---- display -------------------------------------------------------

    /// Canonical printable rendering, used by `print`, string coercion and
    /// index-to-field-name conversion. Record fields print in lexicographic
    /// order regardless of insertion order.
    fn render(&self, value: ValueRef) -> String {
        match self.heap.value(value) {
            Value::None => "None".to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::Int(value) => value.to_string(),
            Value::Str(value) => value.clone(),
            Value::Function(_) => "FUNCTION".to_string(),
            Value::Record(record) => {
                let record = self.heap.record(*record);
                let mut names: Vec<&str> =
                    record.fields.iter().map(|(name, _)| name.as_str()).collect();
                names.sort_unstable();
                let mut rendered = String::from("{");
                for name in names {
                    let field = record
                        .get(name)
                        .expect("sorted name comes from the field list");
                    rendered.push(' ');
                    rendered.push_str(name);
                    rendered.push(':');
                    rendered.push_str(&self.render(field));
                }
                rendered.push_str(" }");
                if rendered == "{ }" {
                    "{}".to_string()
                } else {
                    rendered
                }
            }
        }
    }

    // ---- allocation ----------------------------------------------------

    fn new_value(&mut self, value: Value) -> ExecResult<ValueRef> {
        self.reserve(value.approx_size())?;
        Ok(self.heap.alloc_value(value))
    }

    /// Record and wrapping value reserved together: a collection between
    /// the two allocations would sweep the yet-unreferenced record.
    fn new_record_value(&mut self, record: Record) -> ExecResult<ValueRef> {
        self.reserve(record.approx_size() + mem::size_of::<Value>())?;
        let record = self.heap.alloc_record(record);
        Ok(self.heap.alloc_value(Value::Record(record)))
    }

    fn new_function_value(&mut self, function: Function) -> ExecResult<ValueRef> {
        self.reserve(function.approx_size() + mem::size_of::<Value>())?;
        let function = self.heap.alloc_function(function);
        Ok(self.heap.alloc_value(Value::Function(function)))
    }

    fn new_frame(&mut self, frame: Frame) -> ExecResult<FrameRef> {
        self.reserve(frame.approx_size())?;
        Ok(self.heap.alloc_frame(frame))
    }

    /// Collect when an allocation would cross the memory limit; fail with
    /// `Runtime` if it still would afterwards.
    fn reserve(&mut self, extra: usize) -> ExecResult<()> {
        if !self.heap.would_exceed(extra) {
            return Ok(());
        }
        self.collect();
        if self.heap.would_exceed(extra) {
            return Err(InterpreterError::Runtime);
        }
        Ok(())
    }

    fn collect(&mut self) {
        let mut roots: Vec<HeapRef> = Vec::with_capacity(self.stack.len() + self.temps.len() + 1);
        roots.extend(self.stack.iter().map(|&frame| HeapRef::Frame(frame)));
        roots.extend(self.temps.iter().map(|&value| HeapRef::Value(value)));
        roots.push(HeapRef::Value(self.none));
        self.heap.collect(&roots);
    }
}

/// Names declared `global` anywhere in the body, descending into block,
/// if and while structure but not into nested function literals.
fn collect_globals(block: &Block) -> HashSet<String> {
    let mut names = HashSet::new();
    collect_globals_into(block, &mut names);
    names
}

fn collect_globals_into(block: &Block, names: &mut HashSet<String>) {
    for statement in &block.statements {
        match statement {
            Statement::Global { name } => {
                names.insert(name.clone());
            }
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                collect_globals_into(then_body, names);
                if let Some(else_body) = else_body {
                    collect_globals_into(else_body, names);
                }
            }
            Statement::While { body, .. } => collect_globals_into(body, names),
            _ => {}
        }
    }
}

/// Identifier assignment targets in the body, with the same traversal
/// boundaries as `collect_globals`.
fn collect_assigned(block: &Block) -> HashSet<String> {
    let mut names = HashSet::new();
    collect_assigned_into(block, &mut names);
    names
}

fn collect_assigned_into(block: &Block, names: &mut HashSet<String>) {
    for statement in &block.statements {
        match statement {
            Statement::Assign {
                target: AssignTarget::Name(name),
                ..
            } => {
                names.insert(name.clone());
            }
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                collect_assigned_into(then_body, names);
                if let Some(else_body) = else_body {
                    collect_assigned_into(else_body, names);
                }
            }
            Statement::While { body, .. } => collect_assigned_into(body, names),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Statement;
    use crate::{lexer, parser};

    fn parse_block(source: &str) -> Block {
        let program =
            parser::parse_tokens(lexer::lex(source)).expect("parse failed");
        Block {
            statements: program.statements,
        }
    }

    #[test]
    fn collects_globals_through_nested_control_flow() {
        let block = parse_block(
            "global a;\nif (x) { global b; } else { while (y) { global c; } }",
        );
        let names = collect_globals(&block);
        assert_eq!(
            names,
            HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn global_collection_stops_at_function_literals() {
        let block = parse_block("f = fun() { global hidden; return 1; };");
        assert!(collect_globals(&block).is_empty());
    }

    #[test]
    fn collects_only_identifier_assignment_targets() {
        let block = parse_block("x = 1;\nr.f = 2;\nr[0] = 3;\nwhile (c) { y = 4; }");
        let names = collect_assigned(&block);
        assert_eq!(names, HashSet::from(["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn assigned_collection_stops_at_function_literals() {
        let block = parse_block("f = fun() { inner = 1; };");
        let names = collect_assigned(&block);
        assert_eq!(names, HashSet::from(["f".to_string()]));
        assert!(matches!(block.statements[0], Statement::Assign { .. }));
    }
}
