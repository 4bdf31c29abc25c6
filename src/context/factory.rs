//! Named Context Factory
//!
//! Creates one isolated container per name on first use and caches it until
//! shutdown. Each container gets the units specified for its name, the units
//! of every `default.` specification, and the factory's baseline units.

use super::container::{Container, ContainerBuilder};
use super::types::{ContextInfo, Specification, DEFAULT_PROPERTY_NAME};
use super::unit::{placeholder_unit, SharedUnit};
use crate::environment::MapPropertySource;
use crate::metrics::Metrics;
use crate::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Registry of named child containers
pub struct NamedContextFactory {
    kind: String,
    property_source_name: String,
    property_name: String,
    default_unit: SharedUnit,
    specifications: RwLock<Vec<Specification>>,
    contexts: RwLock<HashMap<String, Arc<Container>>>,
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    parent: RwLock<Option<Arc<Container>>>,
    metrics: Option<Arc<Metrics>>,
}

impl NamedContextFactory {
    /// Create a factory whose contexts are labelled `<kind>-<name>`
    ///
    /// Every context gets a layer called `kind` binding
    /// [`DEFAULT_PROPERTY_NAME`] to its name.
    pub fn new(kind: impl Into<String>, default_unit: SharedUnit) -> Self {
        let kind = kind.into();
        Self::with_property(kind.clone(), default_unit, kind, DEFAULT_PROPERTY_NAME)
    }

    /// Create a factory binding the context name to `property_name` in a
    /// layer called `property_source_name`
    pub fn with_property(
        kind: impl Into<String>,
        default_unit: SharedUnit,
        property_source_name: impl Into<String>,
        property_name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            property_source_name: property_source_name.into(),
            property_name: property_name.into(),
            default_unit,
            specifications: RwLock::new(Vec::new()),
            contexts: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
            parent: RwLock::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    /// Shared parent for contexts created from now on
    pub fn set_parent(&self, parent: Option<Arc<Container>>) {
        *self.parent.write() = parent;
    }

    /// Insert or overwrite specifications by name
    ///
    /// An overwritten specification keeps its original declaration position.
    pub fn set_configurations(&self, specifications: impl IntoIterator<Item = Specification>) {
        let mut current = self.specifications.write();
        for spec in specifications {
            match current.iter_mut().find(|existing| existing.name() == spec.name()) {
                Some(existing) => *existing = spec,
                None => current.push(spec),
            }
        }
    }

    pub fn specification_names(&self) -> Vec<String> {
        self.specifications
            .read()
            .iter()
            .map(|spec| spec.name().to_string())
            .collect()
    }

    /// Cached context for `name`, building it on first use
    ///
    /// Concurrent first lookups of one name share a single build. A failed
    /// build caches nothing, so the next call builds again.
    pub fn get_context(&self, name: &str) -> Result<Arc<Container>> {
        if let Some(context) = self.contexts.read().get(name) {
            return Ok(context.clone());
        }

        let lock = self
            .creation_locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock();
        let result = self.get_or_create_locked(name);
        self.release_creation_lock(name, &lock);
        result
    }

    fn get_or_create_locked(&self, name: &str) -> Result<Arc<Container>> {
        if let Some(context) = self.contexts.read().get(name) {
            return Ok(context.clone());
        }

        match self.create_context(name) {
            Ok(context) => {
                let active = {
                    let mut contexts = self.contexts.write();
                    contexts.insert(name.to_string(), context.clone());
                    contexts.len()
                };
                if let Some(metrics) = &self.metrics {
                    metrics.record_context_created();
                    metrics.set_active_contexts(active);
                }
                info!(context = %context.display_name(), "Created named context");
                Ok(context)
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_context_build_failure();
                }
                error!(context = %name, error = %format!("{:#}", e), "Failed to create named context");
                Err(e)
            }
        }
    }

    /// Forget the creation lock for `name` once no other caller holds it
    ///
    /// Clones are only handed out under the map lock, so a count of two (the
    /// map plus `lock`) means nobody else is waiting.
    fn release_creation_lock(&self, name: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.creation_locks.lock();
        if let Some(current) = locks.get(name) {
            if Arc::ptr_eq(current, lock) && Arc::strong_count(lock) == 2 {
                locks.remove(name);
            }
        }
    }

    /// Build a new container for `name` without caching it
    pub fn create_context(&self, name: &str) -> Result<Arc<Container>> {
        let specifications = self.specifications.read().clone();

        let mut builder = ContainerBuilder::new(name);
        if let Some(spec) = specifications.iter().find(|spec| spec.name() == name) {
            builder = builder.units(spec.units().iter().cloned());
        }
        for spec in specifications.iter().filter(|spec| spec.applies_to_all()) {
            builder = builder.units(spec.units().iter().cloned());
        }

        debug!(context = %name, kind = %self.kind, "Building named context");
        builder
            .unit(placeholder_unit())
            .unit(self.default_unit.clone())
            .add_first_source(
                MapPropertySource::singleton(
                    self.property_source_name.clone(),
                    self.property_name.clone(),
                    name,
                )
                .into_shared(),
            )
            .parent(self.parent.read().clone())
            .display_name(format!("{}-{}", self.kind, name))
            .refresh()
    }

    /// The single provider of `T` in the context called `name`
    pub fn get_instance<T>(&self, name: &str) -> Result<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_context(name)?.get::<T>()
    }

    /// Every provider of `T` in the context called `name`, keyed by component name
    pub fn get_instances<T>(&self, name: &str) -> Result<BTreeMap<String, Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_context(name)?.get_all::<T>()
    }

    /// Names of contexts created so far
    pub fn context_names(&self) -> BTreeSet<String> {
        self.contexts.read().keys().cloned().collect()
    }

    pub fn describe(&self, name: &str) -> Option<ContextInfo> {
        self.contexts
            .read()
            .get(name)
            .map(|context| ContextInfo::from(context.as_ref()))
    }

    pub fn describe_all(&self) -> Vec<ContextInfo> {
        let contexts = self.contexts.read();
        let mut infos: Vec<ContextInfo> = contexts
            .values()
            .map(|context| ContextInfo::from(context.as_ref()))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Close every cached context and clear the cache
    ///
    /// A context that fails to close is logged and skipped.
    pub fn shutdown(&self) {
        let contexts: Vec<(String, Arc<Container>)> = self.contexts.write().drain().collect();
        let count = contexts.len();

        for (name, context) in contexts {
            if let Err(e) = context.close() {
                warn!(context = %name, error = %format!("{:#}", e), "Failed to close named context");
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_active_contexts(self.contexts.read().len());
        }
        info!(kind = %self.kind, closed = count, "Named context factory shut down");
    }
}

impl Drop for NamedContextFactory {
    fn drop(&mut self) {
        if !self.contexts.get_mut().is_empty() {
            self.shutdown();
        }
    }
}
