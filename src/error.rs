//! Error types for hubwire.

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for all hubwire operations.
#[derive(Debug, Error)]
pub enum HubwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed envelope or stream frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Route segment was empty or whitespace.
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// User route collides with a lifecycle route name.
    #[error("Route '{0}' is reserved for connection lifecycle events")]
    ReservedRoute(String),

    /// The same route was registered more than once.
    #[error("Route '{0}' is registered more than once")]
    DuplicateRoute(String),

    /// No handler bound for an inbound route.
    #[error("Handler for route '{0}' not found")]
    RouteNotFound(String),

    /// The handler factory cannot produce the handler type bound to a route.
    #[error("No handler instance of type '{handler}' provided for route '{route}'")]
    HandlerNotProvided {
        /// Route that needs the instance.
        route: String,
        /// Handler type name.
        handler: &'static str,
    },

    /// The handler factory returned an instance of the wrong type.
    #[error("Handler factory returned a value that is not '{0}'")]
    HandlerTypeMismatch(&'static str),

    /// No live connection for the requested address.
    #[error("No live connection to {0}")]
    TargetNotConnected(SocketAddr),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Operation requires a started peer.
    #[error("Peer is not started")]
    NotStarted,

    /// `start()` called twice.
    #[error("Peer is already started")]
    AlreadyStarted,

    /// Failure reported by a handler body.
    #[error("Handler error: {0}")]
    Handler(String),
}

impl HubwireError {
    /// Build a handler failure from any message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Whether this error came from the payload codec.
    pub fn is_serialization(&self) -> bool {
        matches!(
            self,
            Self::MsgPackEncode(_) | Self::MsgPackDecode(_) | Self::Json(_)
        )
    }
}

/// Result type alias using HubwireError.
pub type Result<T> = std::result::Result<T, HubwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_classification() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(HubwireError::from(err).is_serialization());
        assert!(!HubwireError::ConnectionClosed.is_serialization());
    }

    #[test]
    fn test_route_not_found_message() {
        let err = HubwireError::RouteNotFound("chat/send".into());
        assert_eq!(err.to_string(), "Handler for route 'chat/send' not found");
    }
}
