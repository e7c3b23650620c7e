//! Handler shapes.
//!
//! A type implements one (or several) of these traits and is registered on a
//! route by type. Which trait applies is fixed at registration, so there is
//! nothing to look up when a message arrives.

use std::future::Future;

use serde::de::DeserializeOwned;

use super::{Context, HandlerResult};

/// A value that can be decoded from a message payload.
///
/// `Default` stands in for a message sent without data (payload length 0).
pub trait Payload: DeserializeOwned + Default + Send + 'static {}

impl<T> Payload for T where T: DeserializeOwned + Default + Send + 'static {}

/// Synchronous handler for messages without payload.
pub trait Handler: Send + Sync + 'static {
    /// Handle one message.
    fn handle(&self, ctx: Context) -> HandlerResult;
}

/// Synchronous handler receiving a decoded payload.
pub trait PayloadHandler<P: Payload>: Send + Sync + 'static {
    /// Handle one message.
    fn handle(&self, ctx: Context, payload: P) -> HandlerResult;
}

/// Asynchronous handler for messages without payload.
pub trait AsyncHandler: Send + Sync + 'static {
    /// Handle one message.
    fn handle(&self, ctx: Context) -> impl Future<Output = HandlerResult> + Send;
}

/// Asynchronous handler receiving a decoded payload.
pub trait AsyncPayloadHandler<P: Payload>: Send + Sync + 'static {
    /// Handle one message.
    fn handle(&self, ctx: Context, payload: P) -> impl Future<Output = HandlerResult> + Send;
}
