//! Bytecode errors

use thiserror::Error;

/// Errors raised while assembling or reading bytecode
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Constant pool index out of range
    #[error("invalid constant index {0}")]
    InvalidConstantIndex(u16),

    /// Nested-function table index out of range
    #[error("invalid function index {0}")]
    InvalidFunctionIndex(u16),

    /// Jump target outside the instruction stream
    #[error("jump target out of range: {0}")]
    InvalidJumpTarget(i64),

    /// Constant pool grew past the index width
    #[error("too many constants (max 65535)")]
    TooManyConstants,
}

/// Result type for bytecode operations
pub type BytecodeResult<T> = Result<T, BytecodeError>;
