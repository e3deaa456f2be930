//! Typed error types for the custom command runtime's host seams.
//!
//! Provides [`HostError`], the canonical error type returned by every
//! implementation of the capability bridge and the document store. Scripts
//! never see a `HostError` directly; the runtime logs it and converts it into
//! a script-visible error that names the attempted operation.

use thiserror::Error;

/// Canonical error type for host-side operations.
///
/// All variants are `#[non_exhaustive]` to allow future additions without
/// breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    /// The trusted process did not answer within the deadline.
    #[error("timeout after {timeout_ms}ms waiting for '{method}'")]
    Timeout {
        /// The capability method that was requested.
        method: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Writing or reading a frame on the transport failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The bridge was shut down while a request was in flight.
    #[error("capability channel closed")]
    ChannelClosed,

    /// The trusted process answered with an error.
    #[error("remote error from '{method}': {message}")]
    Remote {
        /// The capability method that failed.
        method: String,
        /// The error message returned by the trusted process.
        message: String,
    },

    /// The persistent document store failed.
    #[error("document store error: {0}")]
    Store(String),

    /// A reply did not have the expected shape.
    #[error("malformed reply to '{method}': {reason}")]
    MalformedReply {
        /// The capability method whose reply was malformed.
        method: String,
        /// What was wrong with it.
        reason: String,
    },

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HostError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TIMEOUT",
            Self::Transport(_) => "TRANSPORT",
            Self::ChannelClosed => "CHANNEL_CLOSED",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::MalformedReply { .. } => "MALFORMED_REPLY",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the operation that produced this error may succeed if retried.
    ///
    /// The runtime itself never retries; this is advice for the invoking surface.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport(_) => true,
            Self::Store(_) => true,
            Self::ChannelClosed => false,
            Self::Remote { .. } => false,
            Self::MalformedReply { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Convert to a structured JSON error for the surface that invoked the script.
    ///
    /// Returns an object with `error`, `code`, `message`, `retryable` and,
    /// for retryable kinds, a `suggested_fix`.
    pub fn to_structured_error(&self) -> serde_json::Value {
        let suggested_fix = match self {
            Self::Timeout { .. } => Some("Retry the command"),
            Self::Transport(_) => Some("Retry after a delay"),
            Self::Store(_) => Some("Retry after a delay"),
            _ => None,
        };

        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        });

        if let Some(fix) = suggested_fix {
            obj["suggested_fix"] = serde_json::Value::String(fix.to_string());
        }

        obj
    }
}

// HostError crosses task boundaries inside the bridge.
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<HostError>();
};
