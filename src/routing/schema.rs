//! Compiled schema.
//!
//! A [`Schema`] is the ordered list of route bindings produced by
//! [`SchemaBuilder::build`](super::SchemaBuilder::build). It never changes
//! after build and is cheap to clone.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::handler::Binding;

static NEXT_DELEGATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an inline handler function, assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateId(u64);

impl DelegateId {
    pub(crate) fn next() -> Self {
        Self(NEXT_DELEGATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Runtime identity of a Rust type, with its name for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Tag for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The type's `TypeId`.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The type's name as reported by `std::any::type_name`.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this tags `T`.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

/// How the handler of an entry is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// A handler type, instantiated through the handler factory.
    Class,
    /// An inline function.
    Delegate,
}

/// Reference to the handler bound to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerRef {
    /// Handler type.
    Class(TypeTag),
    /// Inline function.
    Delegate(DelegateId),
}

/// One route binding.
#[derive(Clone)]
pub struct SchemaEntry {
    route: String,
    payload: Option<TypeTag>,
    binding: Binding,
}

impl SchemaEntry {
    pub(crate) fn new(route: String, payload: Option<TypeTag>, binding: Binding) -> Self {
        Self {
            route,
            payload,
            binding,
        }
    }

    /// Fully composed route.
    #[inline]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Handler type or function identity.
    pub fn handler(&self) -> HandlerRef {
        match &self.binding {
            Binding::Class { handler, .. } => HandlerRef::Class(*handler),
            Binding::Delegate { id, .. } => HandlerRef::Delegate(*id),
        }
    }

    /// Class or Delegate.
    pub fn kind(&self) -> HandlerKind {
        match self.binding {
            Binding::Class { .. } => HandlerKind::Class,
            Binding::Delegate { .. } => HandlerKind::Delegate,
        }
    }

    /// Payload type, `None` when the handler takes no payload.
    #[inline]
    pub fn payload_type(&self) -> Option<TypeTag> {
        self.payload
    }

    pub(crate) fn binding(&self) -> &Binding {
        &self.binding
    }

    pub(crate) fn prefixed(mut self, prefix: &str, separator: &str) -> Self {
        self.route = super::route::join(prefix, &self.route, separator);
        self
    }
}

impl fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("route", &self.route)
            .field("handler", &self.handler())
            .field("payload", &self.payload.map(|p| p.name()))
            .finish()
    }
}

/// Ordered, immutable collection of [`SchemaEntry`] in declaration order.
#[derive(Clone)]
pub struct Schema {
    entries: Arc<[SchemaEntry]>,
}

impl Schema {
    pub(crate) fn new(entries: Vec<SchemaEntry>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, SchemaEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schema has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Composed routes in declaration order.
    pub fn routes(&self) -> Vec<&str> {
        self.entries.iter().map(SchemaEntry::route).collect()
    }

    /// Entry for `route`. With repeated registrations, the last one.
    pub fn find(&self, route: &str) -> Option<&SchemaEntry> {
        self.entries.iter().rev().find(|e| e.route == route)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = &'a SchemaEntry;
    type IntoIter = std::slice::Iter<'a, SchemaEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}
