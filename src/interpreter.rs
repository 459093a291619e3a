//! Tree-walking interpreter.
//!
//! Executes AST statements directly: a frame stack with lexical parent
//! chains for name resolution, and a single owning heap with mark-and-sweep
//! reclamation for values, records, closures and frames.

use std::io::{BufRead, Write};

use crate::ast::Program;

mod error;
mod heap;
mod runtime;
mod value;

pub use error::{ExecResult, InterpreterError};
use runtime::Runtime;

pub const DEFAULT_MEMORY_LIMIT_MB: usize = 4;

/// Public entry point. `print` writes to `out`; `input` reads from `input`.
pub struct Interpreter<'io> {
    out: &'io mut dyn Write,
    input: &'io mut dyn BufRead,
    memory_limit_bytes: usize,
}

impl<'io> Interpreter<'io> {
    pub fn new(out: &'io mut dyn Write, input: &'io mut dyn BufRead) -> Self {
        Self::with_memory_limit(out, input, DEFAULT_MEMORY_LIMIT_MB)
    }

    pub fn with_memory_limit(
        out: &'io mut dyn Write,
        input: &'io mut dyn BufRead,
        megabytes: usize,
    ) -> Self {
        Self {
            out,
            input,
            memory_limit_bytes: megabytes * 1024 * 1024,
        }
    }

    pub fn run(&mut self, program: &Program) -> ExecResult<()> {
        Runtime::new(self.memory_limit_bytes, &mut *self.out, &mut *self.input).run(program)
    }
}
