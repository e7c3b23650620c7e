//! Resolution of a compiled schema into a lookup table.
//!
//! Runs once when the peer starts. Every failure here (missing handler
//! instance, duplicate route) is fatal to startup.

use std::collections::HashMap;
use std::fmt;
use std::future::ready;
use std::sync::Arc;

use bytes::Bytes;

use super::bind::{Binding, Thunk};
use super::{BoxFuture, Context, HandlerFactory, HandlerResult};
use crate::config::DuplicateRoutePolicy;
use crate::error::{HubwireError, Result};
use crate::routing::Schema;

/// Route to thunk map used by the dispatcher.
///
/// Read-only after construction.
pub struct HandlerTable {
    thunks: HashMap<String, Thunk>,
}

impl HandlerTable {
    /// Bind every entry of `schema` to a callable thunk.
    ///
    /// Type-based entries are checked against `factory` up front and fail
    /// with [`HubwireError::HandlerNotProvided`] when the factory cannot
    /// build them.
    pub fn resolve(
        schema: &Schema,
        factory: Arc<dyn HandlerFactory>,
        duplicates: DuplicateRoutePolicy,
    ) -> Result<Self> {
        let mut thunks: HashMap<String, Thunk> = HashMap::with_capacity(schema.len());

        for entry in schema.iter() {
            let thunk = match entry.binding() {
                Binding::Delegate { call, .. } => call.clone(),
                Binding::Class { handler, call } => {
                    let handler = *handler;
                    if !factory.provides(handler.id()) {
                        return Err(HubwireError::HandlerNotProvided {
                            route: entry.route().to_string(),
                            handler: handler.name(),
                        });
                    }

                    let factory = factory.clone();
                    let call = call.clone();
                    let route = entry.route().to_string();
                    let thunk = move |ctx: Context,
                                      payload: Option<Bytes>|
                          -> BoxFuture<'static, HandlerResult> {
                        match factory.get(handler.id()) {
                            Some(instance) => call(instance, ctx, payload),
                            None => Box::pin(ready(Err(HubwireError::HandlerNotProvided {
                                route: route.clone(),
                                handler: handler.name(),
                            }))),
                        }
                    };
                    Arc::new(thunk) as Thunk
                }
            };

            if thunks.insert(entry.route().to_string(), thunk).is_some() {
                match duplicates {
                    DuplicateRoutePolicy::Reject => {
                        return Err(HubwireError::DuplicateRoute(entry.route().to_string()));
                    }
                    DuplicateRoutePolicy::Override => {
                        tracing::warn!(route = entry.route(), "Route registered twice, last one wins");
                    }
                }
            }
        }

        tracing::debug!(routes = thunks.len(), "Handler table resolved");
        Ok(Self { thunks })
    }

    pub(crate) fn get(&self, route: &str) -> Option<&Thunk> {
        self.thunks.get(route)
    }

    /// Whether a handler is bound to `route`.
    pub fn contains(&self, route: &str) -> bool {
        self.thunks.contains_key(route)
    }

    /// Number of bound routes.
    pub fn len(&self) -> usize {
        self.thunks.len()
    }

    /// Whether no routes are bound.
    pub fn is_empty(&self) -> bool {
        self.thunks.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<&str> = self.thunks.keys().map(String::as_str).collect();
        routes.sort_unstable();
        f.debug_struct("HandlerTable").field("routes", &routes).finish()
    }
}
