//! Internal error channel of the evaluator.
//!
//! Script-level exceptions are real objects: instances of the builtin
//! `Exception` class hierarchy (or user classes derived from it), carried by
//! [`RunError::Raise`] until a matching `except` handler binds them. Fatal
//! errors (recursion overflow, broken trees, internal invariants) bypass all
//! handlers and surface to the host.

use crate::{
    exception_public::CodeLoc,
    resource::ResourceError,
    value::Value,
};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// A runtime error in flight.
#[derive(Debug)]
pub(crate) enum RunError {
    /// A raised script exception: the exception object (an owned reference)
    /// and the position of the `raise` or of the failing operation.
    Raise { value: Value, pos: CodeLoc },
    /// A non-recoverable failure; never catchable by `try/except`.
    Fatal { message: String, pos: CodeLoc },
}

impl RunError {
    /// Converts a resource-limit violation into a fatal error.
    pub fn from_resource(err: ResourceError, pos: CodeLoc) -> Self {
        Self::Fatal {
            message: err.to_string(),
            pos,
        }
    }

    /// A fatal error for malformed trees and broken internal invariants.
    pub fn fatal(message: impl Into<String>, pos: CodeLoc) -> Self {
        Self::Fatal {
            message: message.into(),
            pos,
        }
    }
}
