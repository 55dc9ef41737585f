//! Engine errors
//!
//! Every error that can leave an evaluation entry point carries a source
//! position when one is known. Script-thrown values, ECMA errors, evaluator
//! (host-surface) failures and wrapped host errors are distinct kinds; the
//! continuation marker variants unwind the interpreter without ever being
//! catchable by script code.

use std::sync::Arc;

use thiserror::Error;

use crate::interpreter::Continuation;
use crate::value::Value;

/// Position of an error in script source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePosition {
    /// Source name supplied at compile time
    pub source_name: String,
    /// 1-based line number (0 when unknown)
    pub line: u32,
    /// Text of the offending line, when available
    pub line_source: Option<String>,
    /// Offset within the line
    pub line_offset: u32,
}

impl SourcePosition {
    /// Create a position from a source name and line
    pub fn new(source_name: impl Into<String>, line: u32) -> Self {
        Self {
            source_name: source_name.into(),
            line,
            line_source: None,
            line_offset: 0,
        }
    }

    /// The unknown-source fallback
    pub fn unknown() -> Self {
        Self::new("unknown source", 0)
    }
}

impl std::fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source_name, self.line)
    }
}

/// ECMA error kinds (the standard error constructors)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcmaErrorKind {
    /// SyntaxError
    Syntax,
    /// TypeError
    Type,
    /// ReferenceError
    Reference,
    /// RangeError
    Range,
    /// EvalError
    Eval,
    /// URIError
    Uri,
}

impl EcmaErrorKind {
    /// The constructor name for this kind
    pub fn constructor_name(self) -> &'static str {
        match self {
            Self::Syntax => "SyntaxError",
            Self::Type => "TypeError",
            Self::Reference => "ReferenceError",
            Self::Range => "RangeError",
            Self::Eval => "EvalError",
            Self::Uri => "URIError",
        }
    }
}

/// Engine errors
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A standard ECMA error (TypeError, SyntaxError, ...)
    #[error("{}: {message} ({})", kind.constructor_name(), position.clone().unwrap_or_default())]
    Ecma {
        /// Error kind
        kind: EcmaErrorKind,
        /// Message
        message: String,
        /// Source position
        position: Option<SourcePosition>,
    },

    /// A host-surface failure (I/O, loader, continuation rules, codegen
    /// limits)
    #[error("EvaluatorException: {message} ({})", position.clone().unwrap_or_default())]
    Evaluator {
        /// Message
        message: String,
        /// Source position
        position: Option<SourcePosition>,
    },

    /// An adapted non-engine error
    #[error("WrappedException: {message}")]
    Wrapped {
        /// Display form of the wrapped error
        message: String,
        /// The original error
        inner: Arc<dyn std::error::Error + Send + Sync>,
        /// Source position
        position: Option<SourcePosition>,
    },

    /// A value thrown by script code
    #[error("uncaught JavaScript exception: {value:?}")]
    Throw {
        /// The thrown value
        value: Value,
        /// Source position
        position: Option<SourcePosition>,
    },

    /// A context misuse (sealed mutation, cross-thread enter, unbalanced
    /// exit)
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An invalid argument to an engine API
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Raised by `Context::capture_continuation`; converted by the
    /// interpreter into `ContinuationPending` after validation
    #[error("continuation capture requested")]
    ContinuationRequest,

    /// Carries a captured continuation out of the evaluation entry point
    #[error("script suspended with a pending continuation")]
    ContinuationPending(Continuation),
}

/// Result type for engine operations
pub type JsResult<T> = Result<T, EngineError>;

impl EngineError {
    /// A TypeError
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Ecma {
            kind: EcmaErrorKind::Type,
            message: message.into(),
            position: None,
        }
    }

    /// A SyntaxError
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::Ecma {
            kind: EcmaErrorKind::Syntax,
            message: message.into(),
            position: None,
        }
    }

    /// A ReferenceError
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::Ecma {
            kind: EcmaErrorKind::Reference,
            message: message.into(),
            position: None,
        }
    }

    /// A RangeError
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::Ecma {
            kind: EcmaErrorKind::Range,
            message: message.into(),
            position: None,
        }
    }

    /// An EvaluatorException
    pub fn evaluator(message: impl Into<String>) -> Self {
        Self::Evaluator {
            message: message.into(),
            position: None,
        }
    }

    /// An IllegalState error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// An IllegalArgument error
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument(message.into())
    }

    /// The source position carried by this error, if any
    pub fn position(&self) -> Option<&SourcePosition> {
        match self {
            Self::Ecma { position, .. }
            | Self::Evaluator { position, .. }
            | Self::Wrapped { position, .. }
            | Self::Throw { position, .. } => position.as_ref(),
            _ => None,
        }
    }

    /// Attach a source position when none is present yet.
    pub fn with_position(self, new_position: SourcePosition) -> Self {
        match self {
            Self::Ecma {
                kind,
                message,
                position,
            } => Self::Ecma {
                kind,
                message,
                position: position.or(Some(new_position)),
            },
            Self::Evaluator { message, position } => Self::Evaluator {
                message,
                position: position.or(Some(new_position)),
            },
            Self::Wrapped {
                message,
                inner,
                position,
            } => Self::Wrapped {
                message,
                inner,
                position: position.or(Some(new_position)),
            },
            Self::Throw { value, position } => Self::Throw {
                value,
                position: position.or(Some(new_position)),
            },
            other => other,
        }
    }

    /// Is this error catchable by script `try` statements?
    pub fn is_script_catchable(&self) -> bool {
        matches!(
            self,
            Self::Ecma { .. } | Self::Throw { .. } | Self::Wrapped { .. }
        )
    }

    /// Adapt an arbitrary host error at a language boundary: engine errors
    /// pass through unchanged, everything else is wrapped.
    pub fn adapt(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match error.downcast::<EngineError>() {
            Ok(engine) => *engine,
            Err(other) => Self::Wrapped {
                message: other.to_string(),
                inner: Arc::from(other),
                position: None,
            },
        }
    }
}

impl From<marten_vm_compiler::CompileError> for EngineError {
    fn from(error: marten_vm_compiler::CompileError) -> Self {
        Self::Ecma {
            kind: EcmaErrorKind::Syntax,
            message: error.to_string(),
            position: None,
        }
    }
}

impl From<marten_regexp::RegExpError> for EngineError {
    fn from(error: marten_regexp::RegExpError) -> Self {
        match error {
            marten_regexp::RegExpError::TooComplex => {
                Self::range_error("regular expression too complex")
            }
            other => Self::syntax_error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapt_passes_engine_errors_through() {
        let original = EngineError::type_error("boom");
        let adapted = EngineError::adapt(Box::new(original));
        assert!(matches!(
            adapted,
            EngineError::Ecma {
                kind: EcmaErrorKind::Type,
                ..
            }
        ));
    }

    #[test]
    fn test_adapt_wraps_foreign_errors() {
        let io = std::io::Error::other("disk gone");
        let adapted = EngineError::adapt(Box::new(io));
        assert!(matches!(adapted, EngineError::Wrapped { .. }));
    }

    #[test]
    fn test_with_position_keeps_existing() {
        let error = EngineError::type_error("x")
            .with_position(SourcePosition::new("a.js", 3))
            .with_position(SourcePosition::new("b.js", 9));
        assert_eq!(error.position().unwrap().source_name, "a.js");
        assert_eq!(error.position().unwrap().line, 3);
    }

    #[test]
    fn test_regexp_error_mapping() {
        let e: EngineError = marten_regexp::RegExpError::TooComplex.into();
        assert!(matches!(
            e,
            EngineError::Ecma {
                kind: EcmaErrorKind::Range,
                ..
            }
        ));
    }
}
