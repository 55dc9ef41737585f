//! Compilation errors

use thiserror::Error;

/// Compilation errors
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// Syntax error with a source position
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        /// Error message
        message: String,
        /// 1-based line
        line: u32,
        /// 0-based column
        column: u32,
    },

    /// The input ended where more is required; an interactive caller may
    /// append input and retry
    #[error("unexpected end of input at line {line}")]
    UnexpectedEndOfInput {
        /// 1-based line
        line: u32,
    },

    /// A construct outside the supported grammar
    #[error("unsupported syntax at {line}:{column}: {message}")]
    Unsupported {
        /// Error message
        message: String,
        /// 1-based line
        line: u32,
        /// 0-based column
        column: u32,
    },

    /// Local slot count exceeded
    #[error("too many local variables (max 65535)")]
    TooManyLocals,

    /// Constant pool index width exceeded
    #[error("too many constants (max 65535)")]
    TooManyConstants,

    /// Invalid assignment target
    #[error("invalid assignment target at {line}:{column}")]
    InvalidAssignmentTarget {
        /// 1-based line
        line: u32,
        /// 0-based column
        column: u32,
    },

    /// Internal compiler error
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Create a syntax error
    pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    /// Create an unsupported-construct error
    pub fn unsupported(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::Unsupported {
            message: message.into(),
            line,
            column,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True when the failure is a premature end of input, i.e. parsing could
    /// succeed if the caller appended more text
    pub fn is_premature_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEndOfInput { .. })
    }

    /// The source line of the error, when known
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::Syntax { line, .. }
            | Self::UnexpectedEndOfInput { line }
            | Self::Unsupported { line, .. }
            | Self::InvalidAssignmentTarget { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
