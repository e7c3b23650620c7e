//! Handler instance factory.
//!
//! Type-based handlers are not stored in the schema. At dispatch time the
//! peer asks a [`HandlerFactory`] for an instance of the registered type, so
//! the instancing policy (shared vs. per call) belongs to the application.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased handler instance handed out by a factory.
pub type HandlerInstance = Arc<dyn Any + Send + Sync>;

/// Source of handler instances, keyed by handler type.
///
/// Called concurrently from dispatch workers.
pub trait HandlerFactory: Send + Sync + 'static {
    /// Produce an instance of the handler type `type_id`.
    fn get(&self, type_id: TypeId) -> Option<HandlerInstance>;

    /// Whether [`get`](Self::get) can produce `type_id`.
    ///
    /// Checked for every type-based route when the peer starts.
    fn provides(&self, type_id: TypeId) -> bool;
}

#[derive(Clone)]
enum Provider {
    Singleton(HandlerInstance),
    Transient(Arc<dyn Fn() -> HandlerInstance + Send + Sync>),
}

/// Built-in [`HandlerFactory`] backed by a type map.
///
/// ```ignore
/// let handlers = HandlerInstances::new()
///     .singleton(ChatHandler::new(store))
///     .transient::<PingHandler>();
/// ```
#[derive(Clone, Default)]
pub struct HandlerInstances {
    providers: HashMap<TypeId, Provider>,
}

impl HandlerInstances {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Share one instance across all dispatches.
    pub fn singleton<H: Send + Sync + 'static>(mut self, handler: H) -> Self {
        self.providers
            .insert(TypeId::of::<H>(), Provider::Singleton(Arc::new(handler)));
        self
    }

    /// Build a fresh `H::default()` for every dispatch.
    pub fn transient<H: Default + Send + Sync + 'static>(self) -> Self {
        self.transient_with(H::default)
    }

    /// Build a fresh instance with `make` for every dispatch.
    pub fn transient_with<H, F>(mut self, make: F) -> Self
    where
        H: Send + Sync + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let make = move || -> HandlerInstance { Arc::new(make()) };
        self.providers
            .insert(TypeId::of::<H>(), Provider::Transient(Arc::new(make)));
        self
    }

    /// Number of registered handler types.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no handler types are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl HandlerFactory for HandlerInstances {
    fn get(&self, type_id: TypeId) -> Option<HandlerInstance> {
        match self.providers.get(&type_id)? {
            Provider::Singleton(instance) => Some(instance.clone()),
            Provider::Transient(make) => Some(make()),
        }
    }

    fn provides(&self, type_id: TypeId) -> bool {
        self.providers.contains_key(&type_id)
    }
}

impl fmt::Debug for HandlerInstances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerInstances")
            .field("types", &self.providers.len())
            .finish()
    }
}
