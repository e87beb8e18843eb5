//! Dependency injection by name.
//!
//! After a command object is resolved it is offered a
//! [`DependencyInjector`] through
//! [`CommandObject::autowire`](crate::CommandObject::autowire). The object
//! pulls the dependencies whose names match its properties; a name with no
//! registered dependency is simply skipped.
//!
//! ```rust
//! use bindery::{Dependencies, DependencyInjector};
//! use std::sync::Arc;
//!
//! struct Mailer { from: String }
//!
//! let deps = Dependencies::new().with("mailer", Mailer { from: "ops@example.com".into() });
//! let injector: &dyn DependencyInjector = &deps;
//!
//! let mailer: Arc<Mailer> = injector.get("mailer").unwrap();
//! assert_eq!(mailer.from, "ops@example.com");
//! assert!(injector.get::<Mailer>("clock").is_none());
//! ```

use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared, type-erased dependency.
pub type Dependency = Arc<dyn Any + Send + Sync>;

/// Looks up dependencies by property name.
pub trait DependencyInjector: Send + Sync {
    fn dependency(&self, name: &str) -> Option<Dependency>;
}

impl dyn DependencyInjector + '_ {
    /// Typed lookup. `None` if the name is unknown or holds another type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.dependency(name)?.downcast().ok()
    }
}

/// Name-keyed dependency container.
#[derive(Clone, Default)]
pub struct Dependencies {
    map: IndexMap<String, Dependency>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `name`, replacing any earlier registration.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.map.insert(name.into(), Arc::new(value));
    }

    /// Registers an already shared dependency.
    pub fn insert_shared(&mut self, name: impl Into<String>, value: Dependency) {
        self.map.insert(name.into(), value);
    }

    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("names", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DependencyInjector for Dependencies {
    fn dependency(&self, name: &str) -> Option<Dependency> {
        self.map.get(name).cloned()
    }
}
