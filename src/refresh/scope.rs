//! Refresh Scope
//!
//! Caches components that must be rebuilt after configuration changes. An
//! entry is created on first request and dropped by `refresh`/`refresh_all`;
//! the next request builds it again against the current environment.

use crate::error::ContextError;
use crate::Result;
use anyhow::bail;
use parking_lot::RwLock;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type ScopedInstance = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct RefreshScope {
    instances: RwLock<HashMap<String, ScopedInstance>>,
    generation: AtomicU64,
}

impl RefreshScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached instance called `name`, created with `factory` when absent
    ///
    /// The factory runs outside the cache lock; when two callers race, the
    /// first stored instance wins.
    pub fn get_or_create<T, F>(&self, name: &str, factory: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        if let Some(existing) = self.instances.read().get(name) {
            return downcast(name, existing.clone());
        }

        let created: ScopedInstance = Arc::new(factory()?);
        let stored = self
            .instances
            .write()
            .entry(name.to_string())
            .or_insert(created)
            .clone();
        debug!(name = %name, "Created refresh scoped instance");
        downcast(name, stored)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.read().contains_key(name)
    }

    /// Drop one cached instance; returns whether it existed
    pub fn refresh(&self, name: &str) -> bool {
        let removed = self.instances.write().remove(name).is_some();
        if removed {
            self.generation.fetch_add(1, Ordering::SeqCst);
            debug!(name = %name, "Refresh scoped instance invalidated");
        }
        removed
    }

    /// Drop every cached instance
    pub fn refresh_all(&self) {
        let dropped = {
            let mut instances = self.instances.write();
            let count = instances.len();
            instances.clear();
            count
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(dropped, generation, "Refresh scope invalidated");
    }

    /// Incremented on every invalidation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

fn downcast<T: Send + Sync + 'static>(name: &str, instance: ScopedInstance) -> Result<Arc<T>> {
    match instance.downcast::<T>() {
        Ok(typed) => Ok(typed),
        Err(_) => bail!(ContextError::ScopeTypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
        }),
    }
}
