//! Persistent-entity classification and loading.
//!
//! Resolution treats storage as two capabilities: [`EntityClassifier`] says
//! whether a type is backed by storage, [`EntityLoader`] fetches an instance
//! by identifier. [`EntityRegistry`] implements both on top of typed
//! [`EntityStore`]s; any type with a registered store is persistent.
//!
//! # Example
//!
//! ```rust
//! use bindery::{EntityRegistry, EntityStore, Identifier};
//! use std::collections::HashMap;
//!
//! #[derive(Clone)]
//! struct Widget { id: u64, name: String }
//!
//! struct WidgetStore { rows: HashMap<u64, Widget> }
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("{0}")]
//! struct StoreError(String);
//!
//! impl EntityStore for WidgetStore {
//!     type Item = Widget;
//!     type Id = u64;
//!     type Error = StoreError;
//!
//!     fn parse_id(&self, id: &Identifier) -> Result<u64, StoreError> {
//!         id.as_i64()
//!             .and_then(|n| u64::try_from(n).ok())
//!             .ok_or_else(|| StoreError(format!("'{}' is not a widget id", id)))
//!     }
//!
//!     fn get(&self, id: &u64) -> Result<Option<Widget>, StoreError> {
//!         Ok(self.rows.get(id).cloned())
//!     }
//!
//!     fn not_found_error(id: &u64) -> StoreError {
//!         StoreError(format!("Widget {} not found", id))
//!     }
//! }
//!
//! let mut registry = EntityRegistry::new();
//! registry.register(WidgetStore { rows: HashMap::new() });
//! ```

use crate::error::LoadError;
use crate::source::Identifier;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;

/// Runtime description of a command-object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetType {
    id: TypeId,
    name: &'static str,
}

impl TargetType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path, e.g. `Widget`.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Decides whether a type is a persistent entity.
pub trait EntityClassifier: Send + Sync {
    fn is_persistent(&self, target: &TargetType) -> bool;
}

/// Loads a persistent entity by identifier.
///
/// The returned box must hold an instance of `target`'s type.
pub trait EntityLoader: Send + Sync {
    fn load(&self, target: &TargetType, id: &Identifier) -> Result<Box<dyn Any + Send>, LoadError>;
}

/// Typed storage backend for one entity type.
///
/// - **Two-stage ID resolution**: `parse_id` validates the identifier format
///   before `get` fetches the item, so malformed ids fail early.
/// - **Sync-only**: async stores should `block_on()` internally.
pub trait EntityStore: Send + Sync + 'static {
    /// The domain object type.
    type Item: Send + 'static;

    /// The identifier type.
    type Id: Display;

    /// The error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    fn parse_id(&self, id: &Identifier) -> Result<Self::Id, Self::Error>;

    /// Retrieves an item, returning `None` if not found.
    fn get(&self, id: &Self::Id) -> Result<Option<Self::Item>, Self::Error>;

    fn not_found_error(id: &Self::Id) -> Self::Error;

    /// Retrieves an item, turning `None` into [`not_found_error`](Self::not_found_error).
    fn resolve(&self, id: &Self::Id) -> Result<Self::Item, Self::Error> {
        self.get(id)?.ok_or_else(|| Self::not_found_error(id))
    }
}

type ErasedLoader =
    Box<dyn Fn(&Identifier) -> Result<Box<dyn Any + Send>, LoadError> + Send + Sync>;

/// Registry of entity stores keyed by item type.
///
/// A type is persistent iff a store is registered for it.
#[derive(Default)]
pub struct EntityRegistry {
    loaders: HashMap<TypeId, ErasedLoader>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` as the loader for `S::Item`, replacing any earlier store.
    pub fn register<S: EntityStore>(&mut self, store: S) -> &mut Self {
        let entity = TargetType::of::<S::Item>().short_name();
        let loader: ErasedLoader = Box::new(move |id: &Identifier| {
            let parsed = store.parse_id(id).map_err(|e| LoadError::InvalidId {
                entity,
                id: id.to_string(),
                message: e.to_string(),
            })?;
            store
                .resolve(&parsed)
                .map(|item| Box::new(item) as Box<dyn Any + Send>)
                .map_err(LoadError::store)
        });
        self.loaders.insert(TypeId::of::<S::Item>(), loader);
        self
    }

    pub fn with<S: EntityStore>(mut self, store: S) -> Self {
        self.register(store);
        self
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("len", &self.loaders.len())
            .finish_non_exhaustive()
    }
}

impl EntityClassifier for EntityRegistry {
    fn is_persistent(&self, target: &TargetType) -> bool {
        self.loaders.contains_key(&target.type_id())
    }
}

impl EntityLoader for EntityRegistry {
    fn load(&self, target: &TargetType, id: &Identifier) -> Result<Box<dyn Any + Send>, LoadError> {
        let loader = self
            .loaders
            .get(&target.type_id())
            .ok_or(LoadError::NoLoader(target.name()))?;
        loader(id)
    }
}
