//! Error reporting SPI

use crate::error::{EngineError, SourcePosition};

/// Pluggable sink for warnings, recoverable errors and fatal runtime errors.
///
/// Each method receives the message plus the source position components. The
/// `runtime_error` hook produces the exception the engine raises; hosts may
/// substitute their own type.
pub trait ErrorReporter: Send + Sync {
    /// Report a warning
    fn warning(
        &self,
        message: &str,
        source_name: &str,
        line: u32,
        line_source: Option<&str>,
        line_offset: u32,
    );

    /// Report a recoverable error
    fn error(
        &self,
        message: &str,
        source_name: &str,
        line: u32,
        line_source: Option<&str>,
        line_offset: u32,
    );

    /// Produce the exception for a fatal runtime error
    fn runtime_error(
        &self,
        message: &str,
        source_name: &str,
        line: u32,
        line_source: Option<&str>,
        line_offset: u32,
    ) -> EngineError {
        let mut position = SourcePosition::new(source_name, line);
        position.line_source = line_source.map(str::to_string);
        position.line_offset = line_offset;
        EngineError::evaluator(message).with_position(position)
    }
}

/// Default reporter: logs through `tracing`.
#[derive(Debug, Default)]
pub struct DefaultErrorReporter;

impl ErrorReporter for DefaultErrorReporter {
    fn warning(
        &self,
        message: &str,
        source_name: &str,
        line: u32,
        _line_source: Option<&str>,
        _line_offset: u32,
    ) {
        tracing::warn!(source_name, line, "{}", message);
    }

    fn error(
        &self,
        message: &str,
        source_name: &str,
        line: u32,
        _line_source: Option<&str>,
        _line_offset: u32,
    ) {
        tracing::error!(source_name, line, "{}", message);
    }
}

/// Reporter that swallows everything; used by `string_is_compilable_unit`
/// style probes where diagnostics must not reach the host.
#[derive(Debug, Default)]
pub struct DiscardingErrorReporter;

impl ErrorReporter for DiscardingErrorReporter {
    fn warning(&self, _: &str, _: &str, _: u32, _: Option<&str>, _: u32) {}

    fn error(&self, _: &str, _: &str, _: u32, _: Option<&str>, _: u32) {}
}
