//! Component Container
//!
//! A container is an isolated component registry with its own environment
//! and an optional parent. Components are keyed by the capability type they
//! were registered as; lookups that miss locally continue in the parent.

use super::unit::{CloseHook, Registrar, SharedUnit};
use crate::environment::{Environment, SharedSource};
use crate::error::ContextError;
use crate::Result;
use anyhow::{bail, Context};
use parking_lot::Mutex;
use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

struct ComponentEntry {
    name: String,
    // Always an `Arc<T>` for the `TypeId` the entry is filed under.
    instance: Box<dyn Any + Send + Sync>,
}

/// Components of one container, grouped by capability
#[derive(Default)]
pub(crate) struct ComponentTable {
    by_type: HashMap<TypeId, Vec<ComponentEntry>>,
    names: BTreeMap<String, &'static str>,
}

impl ComponentTable {
    pub(crate) fn insert<T>(&mut self, context: &str, name: String, component: Arc<T>) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.names.contains_key(&name) {
            bail!(ContextError::DuplicateComponent {
                context: context.to_string(),
                name,
            });
        }
        debug!(context = %context, component = %name, capability = type_name::<T>(), "Registered component");
        self.names.insert(name.clone(), type_name::<T>());
        self.by_type
            .entry(TypeId::of::<T>())
            .or_default()
            .push(ComponentEntry {
                name,
                instance: Box::new(component),
            });
        Ok(())
    }

    fn matches<T>(&self) -> Vec<(String, Arc<T>)>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .instance
                            .downcast_ref::<Arc<T>>()
                            .map(|component| (entry.name.clone(), component.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The single local provider of `T`; several providers are an error
    pub(crate) fn unique<T>(&self, context: &str) -> Result<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut found = self.matches::<T>();
        if found.len() > 1 {
            bail!(ContextError::AmbiguousComponent {
                context: context.to_string(),
                type_name: type_name::<T>(),
                candidates: found.into_iter().map(|(name, _)| name).collect(),
            });
        }
        Ok(found.pop().map(|(_, component)| component))
    }

    fn named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.matches::<T>()
            .into_iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, component)| component)
    }
}

/// Isolated component registry
pub struct Container {
    name: String,
    display_name: String,
    environment: Arc<Environment>,
    parent: Option<Arc<Container>>,
    components: ComponentTable,
    close_hooks: Mutex<Vec<CloseHook>>,
    active: AtomicBool,
    created_at: SystemTime,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("components", &self.components.names)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Container {
    pub fn builder(name: impl Into<String>) -> ContainerBuilder {
        ContainerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Diagnostic label
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn parent(&self) -> Option<&Arc<Container>> {
        self.parent.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Locally registered component names with their capability types
    pub fn component_names(&self) -> Vec<(String, &'static str)> {
        self.components
            .names
            .iter()
            .map(|(name, capability)| (name.clone(), *capability))
            .collect()
    }

    /// The single provider of `T`, searching this container then its ancestors
    ///
    /// The first level with any provider decides: one match is returned,
    /// several are [`ContextError::AmbiguousComponent`].
    pub fn get<T>(&self) -> Result<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_active()?;
        let mut level = Some(self);
        while let Some(container) = level {
            if let Some(component) = container.components.unique::<T>(&container.name)? {
                return Ok(Some(component));
            }
            level = container.parent.as_deref();
        }
        Ok(None)
    }

    /// Every provider of `T` by name, including ancestors
    ///
    /// A local name shadows the same name in an ancestor.
    pub fn get_all<T>(&self) -> Result<BTreeMap<String, Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_active()?;
        let mut chain = Vec::new();
        let mut level = Some(self);
        while let Some(container) = level {
            chain.push(container);
            level = container.parent.as_deref();
        }

        let mut result = BTreeMap::new();
        for container in chain.into_iter().rev() {
            result.extend(container.components.matches::<T>());
        }
        Ok(result)
    }

    /// Provider of `T` registered under `name`, searching ancestors too
    pub fn get_named<T>(&self, name: &str) -> Result<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_active()?;
        let mut level = Some(self);
        while let Some(container) = level {
            if let Some(component) = container.components.named::<T>(name) {
                return Ok(Some(component));
            }
            level = container.parent.as_deref();
        }
        Ok(None)
    }

    /// Run the close hooks in reverse registration order
    ///
    /// Every hook runs even when an earlier one fails. Closing twice is a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let hooks = std::mem::take(&mut *self.close_hooks.lock());
        let failures = run_close_hooks(&self.name, hooks);

        info!(context = %self.display_name, failures, "Context closed");
        if failures > 0 {
            bail!(ContextError::CloseFailed {
                context: self.name.clone(),
                failures,
            });
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_active() {
            bail!(ContextError::ContextClosed(self.name.clone()));
        }
        Ok(())
    }
}

fn run_close_hooks(context: &str, hooks: Vec<CloseHook>) -> usize {
    let mut failures = 0;
    for hook in hooks.into_iter().rev() {
        if let Err(e) = hook() {
            failures += 1;
            warn!(context = %context, error = %e, "Close hook failed");
        }
    }
    failures
}

/// Assembles a [`Container`]
///
/// Units run in the order they were added, after the environment and parent
/// are in place.
pub struct ContainerBuilder {
    name: String,
    display_name: Option<String>,
    environment: Option<Arc<Environment>>,
    parent: Option<Arc<Container>>,
    units: Vec<SharedUnit>,
    sources: Vec<SharedSource>,
}

impl ContainerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            environment: None,
            parent: None,
            units: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn unit(mut self, unit: SharedUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn units(mut self, units: impl IntoIterator<Item = SharedUnit>) -> Self {
        self.units.extend(units);
        self
    }

    /// Use `environment` instead of a fresh child of the parent's environment
    pub fn environment(mut self, environment: Arc<Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Layer added ahead of every existing layer; later calls win
    pub fn add_first_source(mut self, source: SharedSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn parent(mut self, parent: Option<Arc<Container>>) -> Self {
        self.parent = parent;
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Run every unit and start the container
    ///
    /// On failure the close hooks registered so far are run and the
    /// container is discarded.
    pub fn refresh(self) -> Result<Arc<Container>> {
        let environment = match self.environment {
            Some(environment) => environment,
            None => Arc::new(match &self.parent {
                Some(parent) => Environment::with_parent(parent.environment().clone()),
                None => Environment::new(),
            }),
        };
        for source in self.sources {
            environment.add_first(source);
        }

        let mut components = ComponentTable::default();
        let mut close_hooks: Vec<CloseHook> = Vec::new();

        for unit in &self.units {
            let mut registrar = Registrar::new(
                &self.name,
                &environment,
                self.parent.as_ref(),
                &mut components,
                &mut close_hooks,
            );
            if let Err(e) = unit.configure(&mut registrar) {
                let failures = run_close_hooks(&self.name, std::mem::take(&mut close_hooks));
                debug!(context = %self.name, unit = %unit.id(), failures, "Discarded partially built context");
                return Err(e)
                    .with_context(|| format!("configuration unit '{}' failed", unit.id()))
                    .context(ContextError::BuildFailed { name: self.name });
            }
        }

        let display_name = self.display_name.unwrap_or_else(|| self.name.clone());
        debug!(
            context = %display_name,
            units = self.units.len(),
            components = components.names.len(),
            "Context refreshed"
        );

        Ok(Arc::new(Container {
            name: self.name,
            display_name,
            environment,
            parent: self.parent,
            components,
            close_hooks: Mutex::new(close_hooks),
            active: AtomicBool::new(true),
            created_at: SystemTime::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::unit::unit;
    use crate::environment::MapPropertySource;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Fixed(&'static str);

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.to_string()
        }
    }

    fn greeter_unit(id: &'static str, component: &'static str, text: &'static str) -> SharedUnit {
        unit(id, move |registrar| {
            registrar.register::<dyn Greeter>(component, Arc::new(Fixed(text)))
        })
    }

    #[test]
    fn test_lookup_by_capability() {
        let container = Container::builder("svc")
            .unit(greeter_unit("u", "hello", "hi"))
            .unit(unit("count", |registrar| registrar.register("count", Arc::new(7u32))))
            .refresh()
            .unwrap();

        let greeter = container.get::<dyn Greeter>().unwrap().unwrap();
        assert_eq!(greeter.greet(), "hi");
        assert_eq!(*container.get::<u32>().unwrap().unwrap(), 7);
        assert!(container.get::<String>().unwrap().is_none());
        assert_eq!(
            container.component_names(),
            vec![
                ("count".to_string(), "u32"),
                ("hello".to_string(), type_name::<dyn Greeter>()),
            ]
        );
    }

    #[test]
    fn test_ambiguous_lookup() {
        let container = Container::builder("svc")
            .unit(greeter_unit("a", "one", "1"))
            .unit(greeter_unit("b", "two", "2"))
            .refresh()
            .unwrap();

        let err = container.get::<dyn Greeter>().err().unwrap();
        match ContextError::find(&err) {
            Some(ContextError::AmbiguousComponent { candidates, .. }) => {
                assert_eq!(candidates, &vec!["one".to_string(), "two".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(container.get_all::<dyn Greeter>().unwrap().len(), 2);
        assert_eq!(
            container.get_named::<dyn Greeter>("two").unwrap().unwrap().greet(),
            "2"
        );
    }

    #[test]
    fn test_duplicate_component_name_fails_build() {
        let err = Container::builder("svc")
            .unit(greeter_unit("a", "same", "1"))
            .unit(unit("b", |registrar| registrar.register("same", Arc::new(1u8))))
            .refresh()
            .unwrap_err();

        assert!(matches!(
            ContextError::find(&err),
            Some(ContextError::BuildFailed { name }) if name == "svc"
        ));
        assert!(format!("{:#}", err).contains("already has a component named 'same'"));
    }

    #[test]
    fn test_parent_fallback_and_shadowing() {
        let parent = Container::builder("parent")
            .unit(greeter_unit("p", "shared", "parent"))
            .unit(unit("props", |registrar| {
                registrar.environment().add_last(
                    MapPropertySource::singleton("parent-props", "inherited", true).into_shared(),
                );
                Ok(())
            }))
            .refresh()
            .unwrap();

        let child = Container::builder("child")
            .parent(Some(parent.clone()))
            .unit(greeter_unit("c", "shared", "child"))
            .unit(unit("count", |registrar| registrar.register("count", Arc::new(1u64))))
            .refresh()
            .unwrap();

        assert_eq!(child.get::<dyn Greeter>().unwrap().unwrap().greet(), "child");
        let all = child.get_all::<dyn Greeter>().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["shared"].greet(), "child");

        assert!(parent.get::<u64>().unwrap().is_none());
        assert_eq!(child.environment().get_property("inherited"), Some(json!(true)));
    }

    #[test]
    fn test_close_runs_hooks_in_reverse_and_reports_failures() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let recorder = order.clone();

        let container = Container::builder("svc")
            .unit(unit("hooks", move |registrar| {
                for idx in 0..3 {
                    let order = recorder.clone();
                    registrar.on_close(move || {
                        order.lock().unwrap().push(idx);
                        if idx == 1 {
                            anyhow::bail!("hook {} failed", idx);
                        }
                        Ok(())
                    });
                }
                Ok(())
            }))
            .refresh()
            .unwrap();

        let err = container.close().unwrap_err();
        assert!(matches!(
            ContextError::find(&err),
            Some(ContextError::CloseFailed { failures: 1, .. })
        ));
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);

        assert!(container.close().is_ok());
        assert!(!container.is_active());
        assert!(matches!(
            ContextError::find(&container.get::<u32>().unwrap_err()),
            Some(ContextError::ContextClosed(_))
        ));
    }

    #[test]
    fn test_failed_build_runs_registered_hooks() {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();

        let result = Container::builder("svc")
            .unit(unit("first", move |registrar| {
                let flag = flag.clone();
                registrar.on_close(move || {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                });
                Ok(())
            }))
            .unit(unit("broken", |_| anyhow::bail!("boom")))
            .refresh();

        assert!(result.is_err());
        assert!(closed.load(Ordering::SeqCst));
    }
}
