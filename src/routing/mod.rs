//! Routing module - route declaration and the compiled schema.
//!
//! Routes are declared on a [`SchemaBuilder`], optionally grouped under
//! [`hub`](RouteBuilder::hub) prefixes, and compiled into a flat, ordered
//! [`Schema`]:
//!
//! ```ignore
//! let schema = SchemaBuilder::new()
//!     .on_connect::<Greeter>()
//!     .hub("chat", |chat| {
//!         chat.async_route_with::<ChatMessage, ChatHandler>("send")
//!             .hub("admin", |admin| admin.route::<KickHandler>("kick"))
//!     })
//!     .route_fn("ping", |ctx| Ok(()))
//!     .build()?;
//!
//! assert_eq!(schema.routes(), ["__connect", "chat/send", "chat/admin/kick", "ping"]);
//! ```

mod builder;
mod route;
mod schema;

pub use builder::{HubBuilder, Nested, Root, RouteBuilder, SchemaBuilder, Scope};
pub use route::{is_reserved, CONNECT_ROUTE, DEFAULT_SEPARATOR, DISCONNECT_ROUTE};
pub use schema::{DelegateId, HandlerKind, HandlerRef, Schema, SchemaEntry, TypeTag};
