//! Route builder.
//!
//! [`SchemaBuilder`] is the root scope, [`HubBuilder`] a nested one. Both are
//! the same [`RouteBuilder`] with a different scope marker, so lifecycle
//! routes (`on_connect`/`on_disconnect`) and [`build`](RouteBuilder::build)
//! exist only at the root.
//!
//! Errors are recorded on the builder and reported by `build()`, keeping the
//! declaration chain free of `?`.

use std::future::Future;
use std::marker::PhantomData;

use super::route::{self, is_reserved, CONNECT_ROUTE, DEFAULT_SEPARATOR, DISCONNECT_ROUTE};
use super::schema::{Schema, SchemaEntry, TypeTag};
use crate::error::{HubwireError, Result};
use crate::handler::{
    AsyncHandler, AsyncPayloadHandler, Binding, Context, Handler, HandlerResult, Payload,
    PayloadHandler,
};

/// Scope marker for the top-level builder.
#[derive(Debug)]
pub enum Root {}

/// Scope marker for builders inside a hub.
#[derive(Debug)]
pub enum Nested {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Root {}
    impl Sealed for super::Nested {}
}

/// Implemented by [`Root`] and [`Nested`] only.
pub trait Scope: sealed::Sealed {
    /// Routes declared here are compiled without a hub prefix.
    const ROOT: bool;
}

impl Scope for Root {
    const ROOT: bool = true;
}

impl Scope for Nested {
    const ROOT: bool = false;
}

/// Route declarations for one scope.
#[derive(Debug)]
pub struct RouteBuilder<S> {
    separator: String,
    entries: Vec<SchemaEntry>,
    error: Option<HubwireError>,
    _scope: PhantomData<fn() -> S>,
}

/// Top-level builder producing a [`Schema`].
pub type SchemaBuilder = RouteBuilder<Root>;

/// Builder passed to [`RouteBuilder::hub`] closures.
pub type HubBuilder = RouteBuilder<Nested>;

impl<S: Scope> RouteBuilder<S> {
    fn with_separator_unchecked(separator: String) -> Self {
        Self {
            separator,
            entries: Vec::new(),
            error: None,
            _scope: PhantomData,
        }
    }

    fn declare(mut self, path: &str, payload: Option<TypeTag>, binding: Binding) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = route::validate(path, &self.separator) {
            self.error = Some(e);
            return self;
        }
        // Inside a hub the compiled route always carries a prefix.
        if S::ROOT && is_reserved(path) {
            self.error = Some(HubwireError::ReservedRoute(path.to_string()));
            return self;
        }
        self.entries
            .push(SchemaEntry::new(path.to_string(), payload, binding));
        self
    }

    /// Separator joining hub prefixes and routes.
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Number of entries declared in this scope so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was declared in this scope.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind `path` to handler type `H`, no payload.
    pub fn route<H: Handler>(self, path: &str) -> Self {
        self.declare(path, None, Binding::sync_class::<H>())
    }

    /// Bind `path` to handler type `H`, decoding a `P` payload.
    pub fn route_with<P: Payload, H: PayloadHandler<P>>(self, path: &str) -> Self {
        self.declare(
            path,
            Some(TypeTag::of::<P>()),
            Binding::sync_class_with::<P, H>(),
        )
    }

    /// Bind `path` to async handler type `H`, no payload.
    pub fn async_route<H: AsyncHandler>(self, path: &str) -> Self {
        self.declare(path, None, Binding::async_class::<H>())
    }

    /// Bind `path` to async handler type `H`, decoding a `P` payload.
    pub fn async_route_with<P: Payload, H: AsyncPayloadHandler<P>>(self, path: &str) -> Self {
        self.declare(
            path,
            Some(TypeTag::of::<P>()),
            Binding::async_class_with::<P, H>(),
        )
    }

    /// Bind `path` to an inline function, no payload.
    pub fn route_fn<F>(self, path: &str, f: F) -> Self
    where
        F: Fn(Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.declare(path, None, Binding::sync_fn(f))
    }

    /// Bind `path` to an inline function taking a `P` payload.
    pub fn route_fn_with<P, F>(self, path: &str, f: F) -> Self
    where
        P: Payload,
        F: Fn(Context, P) -> HandlerResult + Send + Sync + 'static,
    {
        self.declare(path, Some(TypeTag::of::<P>()), Binding::sync_fn_with(f))
    }

    /// Bind `path` to an async inline function, no payload.
    pub fn async_route_fn<F, Fut>(self, path: &str, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.declare(path, None, Binding::async_fn(f))
    }

    /// Bind `path` to an async inline function taking a `P` payload.
    pub fn async_route_fn_with<P, F, Fut>(self, path: &str, f: F) -> Self
    where
        P: Payload,
        F: Fn(Context, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.declare(path, Some(TypeTag::of::<P>()), Binding::async_fn_with(f))
    }

    /// Declare routes under `prefix`.
    ///
    /// Every route declared by `configure` is prefixed with
    /// `prefix + separator`. Hubs nest; an empty hub adds nothing.
    pub fn hub<F>(mut self, prefix: &str, configure: F) -> Self
    where
        F: FnOnce(HubBuilder) -> HubBuilder,
    {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = route::validate(prefix, &self.separator) {
            self.error = Some(e);
            return self;
        }

        let hub = configure(HubBuilder::with_separator_unchecked(self.separator.clone()));
        if let Some(e) = hub.error {
            self.error = Some(e);
            return self;
        }

        let separator = &self.separator;
        let prefixed: Vec<SchemaEntry> = hub
            .entries
            .into_iter()
            .map(|entry| entry.prefixed(prefix, separator))
            .collect();
        self.entries.extend(prefixed);
        self
    }
}

impl RouteBuilder<Root> {
    /// Create a root builder using [`DEFAULT_SEPARATOR`].
    pub fn new() -> Self {
        Self::with_separator_unchecked(DEFAULT_SEPARATOR.to_string())
    }

    /// Use `separator` for hubs declared after this call.
    pub fn with_separator(mut self, separator: &str) -> Self {
        if separator.is_empty() {
            self.error
                .get_or_insert_with(|| HubwireError::InvalidRoute("separator is empty".into()));
        } else {
            self.separator = separator.to_string();
        }
        self
    }

    fn lifecycle(mut self, route: &str, binding: Binding) -> Self {
        self.entries
            .push(SchemaEntry::new(route.to_string(), None, binding));
        self
    }

    /// Run handler type `H` when a connection is established.
    pub fn on_connect<H: Handler>(self) -> Self {
        self.lifecycle(CONNECT_ROUTE, Binding::sync_class::<H>())
    }

    /// Run async handler type `H` when a connection is established.
    pub fn on_connect_async<H: AsyncHandler>(self) -> Self {
        self.lifecycle(CONNECT_ROUTE, Binding::async_class::<H>())
    }

    /// Run `f` when a connection is established.
    pub fn on_connect_fn<F>(self, f: F) -> Self
    where
        F: Fn(Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.lifecycle(CONNECT_ROUTE, Binding::sync_fn(f))
    }

    /// Run handler type `H` when a connection closes.
    pub fn on_disconnect<H: Handler>(self) -> Self {
        self.lifecycle(DISCONNECT_ROUTE, Binding::sync_class::<H>())
    }

    /// Run async handler type `H` when a connection closes.
    pub fn on_disconnect_async<H: AsyncHandler>(self) -> Self {
        self.lifecycle(DISCONNECT_ROUTE, Binding::async_class::<H>())
    }

    /// Run `f` when a connection closes.
    pub fn on_disconnect_fn<F>(self, f: F) -> Self
    where
        F: Fn(Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.lifecycle(DISCONNECT_ROUTE, Binding::sync_fn(f))
    }

    /// Compile the declarations.
    ///
    /// Fails with the first recorded error ([`HubwireError::InvalidRoute`]
    /// or [`HubwireError::ReservedRoute`]).
    pub fn build(self) -> Result<Schema> {
        if let Some(e) = self.error {
            return Err(e);
        }
        tracing::debug!(routes = self.entries.len(), "Schema built");
        Ok(Schema::new(self.entries))
    }
}

impl Default for RouteBuilder<Root> {
    fn default() -> Self {
        Self::new()
    }
}
