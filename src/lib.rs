//! # hubwire
//!
//! Route-based message dispatch over point-to-point transports.
//!
//! Applications declare named routes, optionally grouped under hub
//! prefixes, and bind each one to a handler: a handler type (sync or
//! async, with or without a typed payload) or an inline function. A
//! [`Peer`] receives `route + payload` envelopes from its transport, decodes
//! the payload with the configured [`Codec`] and runs the bound handler on a
//! worker task. Handlers reply through their [`Context`] to the current
//! connection, a specific one, or all of them.
//!
//! ## Architecture
//!
//! - **Routing**: [`SchemaBuilder`] → immutable [`Schema`]
//! - **Resolution**: [`Schema`] + [`HandlerFactory`] → [`HandlerTable`] (at start)
//! - **Dispatch**: bounded worker tasks per inbound envelope ([`Dispatcher`])
//! - **Transport**: [`MemoryTransport`] (in-process) and [`TcpTransport`]
//!
//! ## Example
//!
//! ```ignore
//! use hubwire::{Context, HandlerResult, MemoryNetwork, Peer, SchemaBuilder};
//!
//! #[tokio::main]
//! async fn main() -> hubwire::Result<()> {
//!     let schema = SchemaBuilder::new()
//!         .on_connect_fn(|ctx| {
//!             tracing::info!(remote = %ctx.remote_address(), "joined");
//!             Ok(())
//!         })
//!         .hub("chat", |chat| {
//!             chat.async_route_fn_with("send", |ctx: Context, text: String| async move {
//!                 ctx.send_to_others("chat/message", &text).await?;
//!                 Ok(())
//!             })
//!         })
//!         .build()?;
//!
//!     let network = MemoryNetwork::new();
//!     let server = Peer::builder(schema).build(network.bind("127.0.0.1:7000".parse().unwrap()));
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod routing;
pub mod transport;
pub mod writer;

mod peer;

pub use codec::Codec;
pub use config::{
    DuplicateRoutePolicy, PeerConfig, DEFAULT_MAX_CONCURRENT_HANDLERS, DEFAULT_MAX_QUEUED_MESSAGES,
};
pub use dispatch::Dispatcher;
pub use error::{HubwireError, Result};
pub use handler::{
    AsyncHandler, AsyncPayloadHandler, Context, FanOut, Handler, HandlerFactory, HandlerInstances,
    HandlerResult, HandlerTable, Payload, PayloadHandler,
};
pub use peer::{Peer, PeerBuilder};
pub use routing::{HubBuilder, Schema, SchemaBuilder, CONNECT_ROUTE, DISCONNECT_ROUTE};
pub use transport::{
    ConnectionHandle, ConnectionStatus, DeliveryMode, MemoryNetwork, MemoryTransport, TcpConfig,
    TcpTransport, Transport,
};
pub use writer::WriterConfig;
