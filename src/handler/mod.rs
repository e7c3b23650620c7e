//! Handler module - handler shapes, instances, resolution and context.
//!
//! Provides:
//! - [`Handler`], [`PayloadHandler`], [`AsyncHandler`], [`AsyncPayloadHandler`] -
//!   the four handler shapes (sync/async, with or without payload)
//! - [`HandlerFactory`] / [`HandlerInstances`] - where type-based handlers come from
//! - [`HandlerTable`] - the resolved `route -> thunk` lookup table
//! - [`Context`] - what a handler receives, with the fan-out send path
//!
//! # Example
//!
//! ```ignore
//! use hubwire::{AsyncPayloadHandler, Context, HandlerResult};
//!
//! #[derive(Default)]
//! struct Echo;
//!
//! impl AsyncPayloadHandler<String> for Echo {
//!     async fn handle(&self, ctx: Context, text: String) -> HandlerResult {
//!         ctx.send("echo", &text).await
//!     }
//! }
//! ```

mod bind;
mod context;
mod factory;
mod resolver;
mod traits;

use std::future::Future;
use std::pin::Pin;

pub(crate) use bind::Binding;
pub use context::{Context, FanOut};
pub use factory::{HandlerFactory, HandlerInstance, HandlerInstances};
pub use resolver::HandlerTable;
pub use traits::{AsyncHandler, AsyncPayloadHandler, Handler, Payload, PayloadHandler};

/// Result type for handler bodies.
pub type HandlerResult = crate::error::Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
