//! Unified error type for server operations.
//!
//! Subsystem errors (transport, session, launch) are bridged into
//! [`ServerError`] before reaching an LSP handler. Transient communication
//! failures never abort the server: handlers map them to empty results and
//! the session layer handles reconnection. Only corrupt internal state is
//! allowed to panic; the index is ephemeral and a restart is cheap.

use std::time::Duration;

use thiserror::Error;

use crate::bus::TransportError;
use crate::matlab::session::SessionError;

/// Unified error type returned by feature providers and resolvers.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A feature needed the interpreter but none is available (policy is
    /// `never`, or the launch failed). Surfaced to the client as an
    /// "interpreter required" notification plus an empty result.
    #[error("MATLAB is not available")]
    InterpreterUnavailable,

    /// Operation attempted on a dead bus.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Interpreter lifecycle failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A reply arrived but did not have the expected shape.
    #[error("malformed reply on {channel}: {reason}")]
    MalformedReply { channel: String, reason: String },

    /// A user-facing request waited long enough.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    /// Create a malformed-reply error for a channel.
    pub fn malformed(channel: &str, reason: impl Into<String>) -> Self {
        ServerError::MalformedReply {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error should be reported to the user as "MATLAB
    /// required" rather than silently producing an empty result.
    pub fn needs_interpreter(&self) -> bool {
        matches!(self, ServerError::InterpreterUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_includes_channel_and_reason() {
        let err = ServerError::malformed("/linting/response", "expected array");
        assert_eq!(
            err.to_string(),
            "malformed reply on /linting/response: expected array"
        );
    }

    #[test]
    fn transport_closed_bridges_transparently() {
        let err = ServerError::from(TransportError::Closed);
        assert_eq!(err.to_string(), "message bus is closed");
    }

    #[test]
    fn only_unavailable_needs_interpreter() {
        assert!(ServerError::InterpreterUnavailable.needs_interpreter());
        assert!(!ServerError::from(TransportError::Closed).needs_interpreter());
    }
}
