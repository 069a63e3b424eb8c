//! Registration/lookup registry: hands shared component instances to consumers.
//!
//! Components are looked up by a typed [`Key`]. A key carries the factory for
//! its default instance, so `resolve` always succeeds: an explicit
//! registration wins, otherwise the nearest enclosing scope's registration,
//! otherwise the key's default (created once per root and reused).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

type Entry = Arc<dyn Any + Send + Sync>;

/// Typed lookup key with a default-instance factory.
pub struct Key<T: ?Sized + Send + Sync + 'static> {
    name: &'static str,
    default: fn() -> Arc<T>,
}

impl<T: ?Sized + Send + Sync + 'static> Key<T> {
    pub const fn new(name: &'static str, default: fn() -> Arc<T>) -> Self {
        Self { name, default }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: ?Sized + Send + Sync + 'static> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key").field("name", &self.name).finish()
    }
}

/// Scoped component registry.
///
/// Default factories run while a map shard is locked and must not call back
/// into the registry.
pub struct Registry {
    entries: DashMap<&'static str, Entry>,
    defaults: DashMap<&'static str, Entry>,
    parent: Option<Arc<Registry>>,
}

impl Registry {
    /// Create an empty root registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            defaults: DashMap::new(),
            parent: None,
        })
    }

    /// Create a child scope. Registrations in the child override the parent
    /// for consumers holding the child; the parent is unaffected.
    pub fn scope(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            defaults: DashMap::new(),
            parent: Some(Arc::clone(self)),
        })
    }

    /// Register an explicit instance for `key` in this scope.
    pub fn register<T: ?Sized + Send + Sync + 'static>(&self, key: &Key<T>, instance: Arc<T>) {
        debug!("Registry: registered {}", key.name);
        let _ = self.entries.insert(key.name, Arc::new(instance) as Entry);
    }

    /// Remove this scope's registration for `key`. Returns true if one existed.
    pub fn unregister<T: ?Sized + Send + Sync + 'static>(&self, key: &Key<T>) -> bool {
        self.entries.remove(key.name).is_some()
    }

    /// Whether `key` has an explicit registration in this scope or an ancestor.
    pub fn is_registered<T: ?Sized + Send + Sync + 'static>(&self, key: &Key<T>) -> bool {
        self.lookup(key).is_some()
    }

    /// Resolve the instance for `key`, falling back to its default.
    pub fn resolve<T: ?Sized + Send + Sync + 'static>(&self, key: &Key<T>) -> Arc<T> {
        if let Some(instance) = self.lookup(key) {
            return instance;
        }
        self.root().default_for(key)
    }

    fn lookup<T: ?Sized + Send + Sync + 'static>(&self, key: &Key<T>) -> Option<Arc<T>> {
        let mut scope = Some(self);
        while let Some(registry) = scope {
            if let Some(entry) = registry.entries.get(key.name) {
                match entry.value().downcast_ref::<Arc<T>>() {
                    Some(instance) => return Some(Arc::clone(instance)),
                    None => warn!(
                        "Registry: {} registered with a different type, ignoring",
                        key.name
                    ),
                }
            }
            scope = registry.parent.as_deref();
        }
        None
    }

    fn default_for<T: ?Sized + Send + Sync + 'static>(&self, key: &Key<T>) -> Arc<T> {
        let entry = self
            .defaults
            .entry(key.name)
            .or_insert_with(|| {
                debug!("Registry: creating default for {}", key.name);
                Arc::new((key.default)()) as Entry
            })
            .value()
            .clone();

        match entry.downcast_ref::<Arc<T>>() {
            Some(instance) => Arc::clone(instance),
            None => {
                warn!(
                    "Registry: default for {} has a different type, creating a fresh one",
                    key.name
                );
                (key.default)()
            }
        }
    }

    fn root(&self) -> &Registry {
        let mut registry = self;
        while let Some(parent) = registry.parent.as_deref() {
            registry = parent;
        }
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries.len())
            .field("scoped", &self.parent.is_some())
            .finish()
    }
}
