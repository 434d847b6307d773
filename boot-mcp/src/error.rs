//! Error types for protocol client operations.
//!
//! Protocol-level failures keep the peer's [`ErrorData`] untouched so the
//! orchestrator can hand it back verbatim. Everything else collapses into a
//! JSON-RPC internal error when it has to be reported on the wire.

use std::time::Duration;

use boot_types::{BootError, TransportError};
use rmcp::ErrorData;
use rmcp::ServiceError;
use rmcp::model::ErrorCode;
use rmcp::service::{ClientInitializeError, ServerInitializeError};
use rmcp::transport::DynamicTransportError;

/// Errors from [`McpClient`](crate::McpClient) operations.
///
/// Cloneable so a memoized connection attempt can hand the same failure
/// to every caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The transport rejected the operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The server answered with a JSON-RPC error.
    #[error("protocol error {}: {}", .0.code.0, .0.message)]
    Protocol(ErrorData),
    /// No response arrived within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The `initialize` handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The service runtime failed the request for another reason.
    #[error("service error: {0}")]
    Service(String),
}

impl ClientError {
    /// The JSON-RPC error record to report for this failure.
    ///
    /// Protocol errors pass through unchanged; anything else becomes an
    /// internal error carrying the display message.
    #[must_use]
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::Protocol(data) => data.clone(),
            other => ErrorData::new(ErrorCode::INTERNAL_ERROR, other.to_string(), None),
        }
    }
}

impl From<ServiceError> for ClientError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::McpError(data) => Self::Protocol(data),
            ServiceError::Timeout { timeout } => Self::Timeout(timeout),
            ServiceError::TransportClosed => Self::Transport(TransportError::Closed),
            ServiceError::TransportSend(e) => from_transport(&e),
            other => Self::Service(other.to_string()),
        }
    }
}

impl From<ClientInitializeError> for ClientError {
    fn from(err: ClientInitializeError) -> Self {
        match err {
            ClientInitializeError::JsonRpcError(data) => Self::Protocol(data),
            ClientInitializeError::TransportError { error, .. } => from_transport(&error),
            other => Self::Handshake(other.to_string()),
        }
    }
}

impl From<ServerInitializeError> for ClientError {
    fn from(err: ServerInitializeError) -> Self {
        match err {
            ServerInitializeError::InitializeFailed(data) => Self::Protocol(data),
            ServerInitializeError::TransportError { error, .. } => from_transport(&error),
            other => Self::Handshake(other.to_string()),
        }
    }
}

/// Recover the loopback error behind a runtime transport failure.
fn from_transport(err: &DynamicTransportError) -> ClientError {
    match err.error.downcast_ref::<TransportError>() {
        Some(e) => ClientError::Transport(e.clone()),
        None => ClientError::Service(err.to_string()),
    }
}

impl From<ClientError> for BootError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(e) => BootError::Transport(e),
            ClientError::Protocol(data) => BootError::Protocol {
                code: data.code.0,
                message: data.message.into_owned(),
                data: data.data,
            },
            other => BootError::Execution(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_passes_through() {
        let data = ErrorData::new(ErrorCode::METHOD_NOT_FOUND, "no such method", None);
        let err = ClientError::Protocol(data);
        let out = err.to_error_data();
        assert_eq!(out.code, ErrorCode::METHOD_NOT_FOUND);
        assert_eq!(out.message, "no such method");
    }

    #[test]
    fn timeout_becomes_internal_error() {
        let err = ClientError::Timeout(Duration::from_secs(30));
        let out = err.to_error_data();
        assert_eq!(out.code, ErrorCode::INTERNAL_ERROR);
        assert!(out.message.contains("timed out"));
    }

    #[test]
    fn service_errors_map_onto_client_errors() {
        let err: ClientError = ServiceError::TransportClosed.into();
        assert!(matches!(err, ClientError::Transport(TransportError::Closed)));

        let err: ClientError = ServiceError::Timeout {
            timeout: Duration::from_millis(5),
        }
        .into();
        assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_millis(5)));

        let err: ClientError =
            ServiceError::McpError(ErrorData::invalid_params("bad cursor", None)).into();
        assert!(matches!(err, ClientError::Protocol(ref d) if d.code == ErrorCode::INVALID_PARAMS));

        let err: ClientError = ServiceError::UnexpectedResponse.into();
        assert!(matches!(err, ClientError::Service(_)));
    }

    #[test]
    fn converts_into_boot_error() {
        let boot: BootError = ClientError::Transport(TransportError::Closed).into();
        assert_eq!(boot.code(), "transport_error");

        let boot: BootError = ClientError::Protocol(ErrorData::new(
            ErrorCode::INVALID_PARAMS,
            "bad cursor",
            Some(serde_json::json!({"cursor": "x"})),
        ))
        .into();
        match boot {
            BootError::Protocol { code, message, data } => {
                assert_eq!(code, ErrorCode::INVALID_PARAMS.0);
                assert_eq!(message, "bad cursor");
                assert!(data.is_some());
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }
}
