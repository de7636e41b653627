//! Error taxonomy for the hub client and its transports.

use tokio_tungstenite::tungstenite;

use crate::connection::ConnectionState;

/// Errors raised by a [`Transport`](crate::transport::Transport) or its session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection is not started")]
    NotConnected,

    #[error("invalid hub url: {0}")]
    InvalidUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// True when the peer could not be reached at all (refused, reset, aborted).
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::WebSocket(tungstenite::Error::Io(io_err)) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Errors surfaced to callers of [`HubClient`](crate::HubClient).
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The start handshake failed.
    #[error("failed to connect to hub: {0}")]
    ConnectionFailure(#[source] TransportError),

    /// The start handshake was cancelled by the caller.
    #[error("hub connection start was cancelled")]
    Cancelled,

    /// Start was requested on a connection that already left `Created`.
    #[error("hub connection cannot start from the {0} state")]
    InvalidState(ConnectionState),

    /// An outbound send was rejected or the connection is not started.
    #[error("failed to send to hub: {0}")]
    TransportFailure(#[source] TransportError),

    /// Graceful stop failed. Resources were still released.
    #[error("failed to stop hub connection: {0}")]
    DisposeFailure(#[source] TransportError),
}

impl HubError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::ConnectionFailure(_) => "connection_failure",
            Self::Cancelled => "cancelled",
            Self::InvalidState(_) => "invalid_state",
            Self::TransportFailure(_) => "transport_failure",
            Self::DisposeFailure(_) => "dispose_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            HubError::ConnectionFailure(TransportError::Closed).error_code(),
            "connection_failure"
        );
        assert_eq!(
            HubError::TransportFailure(TransportError::NotConnected).error_code(),
            "transport_failure"
        );
        assert_eq!(HubError::Cancelled.error_code(), "cancelled");
    }

    #[test]
    fn source_chain_is_kept() {
        use std::error::Error;
        let err = HubError::DisposeFailure(TransportError::Handshake("nope".into()));
        let source = err.source().expect("dispose failure has a source");
        assert_eq!(source.to_string(), "handshake rejected: nope");
    }

    #[test]
    fn unavailable_io_kinds() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(TransportError::WebSocket(tungstenite::Error::Io(io)).is_unavailable());

        let io = std::io::Error::other("disk");
        assert!(!TransportError::WebSocket(tungstenite::Error::Io(io)).is_unavailable());
        assert!(!TransportError::Closed.is_unavailable());
    }
}
