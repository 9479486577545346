//! Error types for the dataflow code generator.
//!
//! Errors are organized by the phase that produces them: graph construction,
//! schedule harmonization, and code generation. Domain-lookup failures at the
//! bridge are deliberately *not* errors; they surface as an in-band text
//! sentinel (see `bridge`), and only the attempt to persist such output is
//! rejected here.

use thiserror::Error;
use std::fmt;

/// Top-level error type for the generator.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Error while folding a computation into the graph
    #[error("Builder error: {0}")]
    Builder(#[from] BuilderError),

    /// Error while harmonizing fused schedules
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Error during code generation
    #[error("Code generation error: {0}")]
    Codegen(#[from] CodegenError),

    /// Error parsing expression or set text
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error during graph construction.
#[derive(Error, Debug, Clone)]
pub struct BuilderError {
    /// The error message
    pub message: String,
    /// The kind of builder error
    pub kind: BuilderErrorKind,
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderErrorKind {
    /// Referenced space was never declared
    UnknownSpace,
    /// Referenced computation was never added
    UnknownComputation,
    /// Producer/consumer cycle with no viable peel dimension
    UnresolvedCycle,
    /// Size inference failed and no override was given
    MissingSize,
}

impl BuilderError {
    pub fn new(message: impl Into<String>, kind: BuilderErrorKind) -> Self {
        Self { message: message.into(), kind }
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        Self::new(message, BuilderErrorKind::UnresolvedCycle)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(message, BuilderErrorKind::UnknownComputation)
    }
}

/// Error during schedule harmonization.
#[derive(Error, Debug, Clone)]
pub struct ScheduleError {
    /// The error message
    pub message: String,
    /// The kind of schedule error
    pub kind: ScheduleErrorKind,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleErrorKind {
    /// Fused tuples could not reconcile to a common length
    TupleMismatch,
    /// No shared loop level could be found even after interchange
    NoCommonLevel,
}

/// Error during code generation.
#[derive(Error, Debug, Clone)]
pub struct CodegenError {
    /// The error message
    pub message: String,
    /// The kind of codegen error
    pub kind: CodegenErrorKind,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// Output contained a bridge sentinel and was not persisted
    SentinelOutput,
    /// External compiler invocation failed
    CompilerFailed,
    /// Output path could not be written
    BadPath,
}

impl CodegenError {
    pub fn sentinel(message: impl Into<String>) -> Self {
        Self { message: message.into(), kind: CodegenErrorKind::SentinelOutput }
    }
}

/// Error parsing expression or set text.
#[derive(Error, Debug, Clone)]
pub struct ParseError {
    /// The error message
    pub message: String,
    /// Byte offset into the input
    pub offset: usize,
    /// The kind of parse error
    pub kind: ParseErrorKind,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Unexpected character in the input
    UnexpectedChar,
    /// Unexpected token
    UnexpectedToken,
    /// Input ended mid-term
    UnexpectedEof,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize, kind: ParseErrorKind) -> Self {
        Self { message: message.into(), offset, kind }
    }
}

/// Result type using FlowError.
pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BuilderError::cycle("circular data reference in computation 'jac'");
        let s = format!("{}", err);
        assert!(s.contains("circular data reference"));
        assert_eq!(err.kind, BuilderErrorKind::UnresolvedCycle);
    }

    #[test]
    fn test_error_conversion() {
        fn fails() -> FlowResult<()> {
            Err(ScheduleError {
                message: "tuple length 3 vs 5".to_string(),
                kind: ScheduleErrorKind::TupleMismatch,
            })?
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, FlowError::Schedule(_)));
    }
}
