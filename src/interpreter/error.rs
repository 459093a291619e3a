use thiserror::Error;

/// Runtime failures. The display form is the mnemonic the CLI writes to
/// stderr; errors deliberately carry no source locations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterError {
    /// A name read that resolved to no binding in any reachable frame.
    #[error("UninitializedVariable")]
    UninitializedVariable,
    /// An operator or builtin received an operand of the wrong kind.
    #[error("IllegalCast")]
    IllegalCast,
    /// Integer division by zero.
    #[error("IllegalArithmetic")]
    IllegalArithmetic,
    /// Argument-count mismatch on a call, or the memory limit was exceeded.
    #[error("Runtime")]
    Runtime,
}

pub type ExecResult<T> = Result<T, InterpreterError>;
