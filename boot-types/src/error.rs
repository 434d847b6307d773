//! Error types for all boot crates.

use std::any::Any;
use std::time::Duration;

/// Error type returned by user-supplied handler code.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by user-supplied handler code.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors from loopback transport endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint has no peer, or the peer has gone away.
    #[error("not connected")]
    NotConnected,
    /// The endpoint was used before `start()`.
    #[error("transport not started")]
    NotStarted,
    /// `start()` was called twice, or after close.
    #[error("transport already started")]
    AlreadyStarted,
    /// The endpoint (or its peer) has been closed.
    #[error("transport closed")]
    Closed,
}

/// Errors surfaced by the orchestrator and everything below it.
///
/// Each variant maps to a stable envelope code via [`BootError::code`].
/// Variants carry owned strings so a failed connection attempt can be
/// shared between every caller waiting on it.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum BootError {
    /// No server instance was published before the startup deadline.
    #[error("server instance was not published within {after:?}")]
    ServerStartTimeout {
        /// The deadline that elapsed.
        after: Duration,
    },
    /// A deferred handler slot was not resolved before its deadline.
    #[error("{slot} was not published within {after:?}")]
    HandlerTimeout {
        /// Name of the slot that timed out.
        slot: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },
    /// The inbound envelope was malformed or incomplete.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The registered handler lacks the requested optional capability.
    #[error("{0} not supported")]
    NotSupported(String),
    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Structured error returned by the protocol peer.
    #[error("protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code.
        code: i32,
        /// Error message.
        message: String,
        /// Optional error payload.
        data: Option<serde_json::Value>,
    },
    /// Loading or starting user code failed.
    #[error("module error: {0}")]
    Module(String),
    /// Any other failure during dispatch.
    #[error("{0}")]
    Execution(String),
}

impl BootError {
    /// Stable snake_case code used in result envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ServerStartTimeout { .. } => "server_start_timeout",
            Self::HandlerTimeout { .. } => "handler_timeout",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotSupported(_) => "not_supported",
            Self::Transport(_) => "transport_error",
            Self::Protocol { .. } => "protocol_error",
            Self::Module(_) => "module_error",
            Self::Execution(_) => "execution_error",
        }
    }

    /// Message that is safe to show to the end user.
    ///
    /// Timeouts hide their internal detail; every other variant is already
    /// phrased for display.
    #[must_use]
    pub fn safe_message(&self) -> String {
        match self {
            Self::ServerStartTimeout { .. } => {
                "The server did not start in time. Make sure the server module creates and publishes its server when it is loaded.".to_string()
            }
            Self::HandlerTimeout { slot, .. } => format!("The {slot} is not available."),
            other => other.to_string(),
        }
    }

    /// Whether this is one of the deadline failures.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ServerStartTimeout { .. } | Self::HandlerTimeout { .. }
        )
    }

    /// Wrap an arbitrary handler error as an execution failure.
    pub fn execution(err: impl std::fmt::Display) -> Self {
        Self::Execution(err.to_string())
    }

    /// Turn a caught panic payload into an execution failure.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::Execution(format!("panicked: {}", panic_message(payload)))
    }
}

/// The message carried by a panic payload, if it carries one.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

impl From<serde_json::Error> for BootError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}
