use std::fmt;

use anyhow::Error;

/// Failure classes the top level maps to exit codes and per-file handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    Usage,
    Environment,
    InvalidBounds,
    SourceRead,
    OutputOpen,
    OutOfBoundsCrop,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub kind: CodedErrorKind,
}

impl CodedError {
    fn new(kind: CodedErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Usage, "USAGE", message)
    }

    pub fn environment(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Environment, "ENVIRONMENT_QUERY", message)
    }

    pub fn invalid_bounds(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::InvalidBounds, "INVALID_BOUNDS", message)
    }

    pub fn source_read(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::SourceRead, "SOURCE_READ", message)
    }

    pub fn output_open(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::OutputOpen, "OUTPUT_OPEN", message)
    }

    pub fn out_of_bounds_crop(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::OutOfBoundsCrop, "OUT_OF_BOUNDS_CROP", message)
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

/// Walks an anyhow chain looking for a classification, so context wrappers
/// added along the way do not hide the underlying failure class.
pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}
