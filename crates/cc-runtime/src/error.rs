//! Script-visible error type.
//!
//! Every failure a native function can produce surfaces as a [`ScriptError`].
//! The evaluator turns it into a user-facing message and, when `arg` is set,
//! points at the offending argument in the source.

use thiserror::Error;

use crate::context::ArgRef;

/// Category of a script error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised by a native function for bad input or a failed operation.
    Script,
    /// A structural limit was violated (embed limits, storage key/value types).
    Structural,
    /// A capability request or storage call failed or timed out.
    Transport,
    /// The guild's storage budget would be exceeded.
    Budget,
}

impl ErrorKind {
    /// Returns a static code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Script => "SCRIPT_ERROR",
            Self::Structural => "STRUCTURAL_ERROR",
            Self::Transport => "TRANSPORT_ERROR",
            Self::Budget => "BUDGET_EXCEEDED",
        }
    }
}

/// An error raised inside the runtime on behalf of a script.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptError {
    /// What kind of failure this is.
    pub kind: ErrorKind,
    /// Human-readable message shown to the script author.
    pub message: String,
    /// Source location of the argument that caused the failure, if known.
    pub arg: Option<ArgRef>,
}

impl ScriptError {
    /// Create an error with no source attribution.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            arg: None,
        }
    }

    /// Convert to the structured JSON shape reported to the invoking surface.
    pub fn to_structured_error(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": true,
            "code": self.kind.code(),
            "message": self.message,
        });
        if let Some(arg) = self.arg {
            obj["span"] = serde_json::json!({ "start": arg.start, "end": arg.end });
        }
        obj
    }
}
