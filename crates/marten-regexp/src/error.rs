//! Regular expression errors

use thiserror::Error;

/// Errors raised while compiling or executing a regular expression
#[derive(Debug, Clone, Error)]
pub enum RegExpError {
    /// Pattern syntax error
    #[error("Invalid regular expression: {message} (near offset {offset})")]
    Syntax {
        /// Error message
        message: String,
        /// Offset into the pattern where the error was detected
        offset: usize,
    },

    /// Unknown or duplicated flag character
    #[error("Invalid regular expression flags: {0}")]
    InvalidFlags(String),

    /// Backtracking budget exhausted during matching
    #[error("Regular expression too complex")]
    TooComplex,
}

impl RegExpError {
    /// Create a syntax error at a pattern offset
    pub fn syntax(message: impl Into<String>, offset: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            offset,
        }
    }

    /// Create an invalid-flags error
    pub fn invalid_flags(flags: impl Into<String>) -> Self {
        Self::InvalidFlags(flags.into())
    }
}

/// Result type for regexp operations
pub type RegExpResult<T> = Result<T, RegExpError>;
