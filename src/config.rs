//! Peer configuration.

use crate::codec::Codec;
use crate::transport::DeliveryMode;

/// Default maximum concurrent handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Default number of inbound messages buffered while all handlers are busy.
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 1024;

/// What to do when a schema binds the same route more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateRoutePolicy {
    /// Fail `start()` with [`HubwireError::DuplicateRoute`](crate::HubwireError::DuplicateRoute).
    #[default]
    Reject,
    /// The last registration wins; a warning is logged.
    Override,
}

/// Settings for a [`Peer`](crate::Peer).
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Payload codec shared by all handlers.
    pub codec: Codec,
    /// Upper bound on handlers running at once. Intake waits when reached.
    pub max_concurrent_handlers: usize,
    /// Inbound messages buffered ahead of the handlers. Messages arriving
    /// while the buffer is full are dropped. Lifecycle events are never
    /// dropped.
    pub max_queued_messages: usize,
    /// Treat messages for unknown routes as errors (logged) instead of
    /// dropping them silently.
    pub fail_when_no_handlers: bool,
    /// Handling of repeated routes.
    pub duplicate_routes: DuplicateRoutePolicy,
    /// Delivery mode of contexts handed to handlers.
    pub default_delivery: DeliveryMode,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            codec: Codec::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
            fail_when_no_handlers: true,
            duplicate_routes: DuplicateRoutePolicy::default(),
            default_delivery: DeliveryMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.codec, Codec::MsgPack);
        assert_eq!(config.max_concurrent_handlers, 256);
        assert_eq!(config.max_queued_messages, 1024);
        assert!(config.fail_when_no_handlers);
        assert_eq!(config.duplicate_routes, DuplicateRoutePolicy::Reject);
        assert_eq!(config.default_delivery, DeliveryMode::ReliableOrdered);
    }
}
