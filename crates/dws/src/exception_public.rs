//! Host-facing error types.
//!
//! Everything that can go wrong while parsing or running a script is reported
//! to the embedder as an [`Exception`]: syntax errors, fatal runtime errors
//! (recursion overflow, broken invariants), and script exceptions that were
//! never caught by a `try/except` block.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A location in the source text, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeLoc {
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub column: u32,
}

impl CodeLoc {
    /// Creates a location from line and column.
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line: {}, column: {}", self.line, self.column)
    }
}

/// One frame of the call stack captured when an error surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Name of the function or method, or `<main>` for top-level code.
    pub function: String,
    /// Call-site location.
    pub loc: CodeLoc,
}

/// Broad classification of a host-visible error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The source text could not be tokenized or parsed.
    Syntax,
    /// A script exception reached the top level without being handled.
    Runtime,
    /// A non-recoverable failure: resource limit, broken tree, internal invariant.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "Syntax Error"),
            Self::Runtime => write!(f, "Runtime Error"),
            Self::Fatal => write!(f, "Fatal Error"),
        }
    }
}

/// A parse-time or run-time failure reported to the host.
///
/// For uncaught script exceptions, `class_name` holds the exception class of
/// the raised object (for example `EZeroDivide`) and `message` holds
/// `uncaught exception: <Message>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    kind: ErrorKind,
    class_name: String,
    message: String,
    script: String,
    loc: CodeLoc,
    frames: Vec<StackFrame>,
}

impl Exception {
    /// Creates a new exception value.
    #[must_use]
    pub fn new(kind: ErrorKind, class_name: String, message: String, script: String, loc: CodeLoc) -> Self {
        Self {
            kind,
            class_name,
            message,
            script,
            loc,
            frames: Vec::new(),
        }
    }

    /// Attaches captured stack frames, innermost first.
    #[must_use]
    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    /// Returns the broad error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the exception class name (empty for syntax and fatal errors).
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the error message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the script name supplied to the runner.
    #[must_use]
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Returns the source location where the error was produced.
    #[must_use]
    pub fn loc(&self) -> CodeLoc {
        self.loc
    }

    /// Returns the captured stack frames, innermost first.
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.kind)?;
        if !self.class_name.is_empty() {
            write!(f, "{}: ", self.class_name)?;
        }
        write!(f, "{} [{}]", self.message, self.loc)?;
        if !self.script.is_empty() {
            write!(f, " in {}", self.script)?;
        }
        for frame in &self.frames {
            write!(f, "\n  at {} [{}]", frame.function, frame.loc)?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}
