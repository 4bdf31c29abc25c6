//! Configuration Units
//!
//! A unit is a named piece of wiring that registers components into a
//! container while it is being built.

use super::container::{ComponentTable, Container};
use crate::environment::Environment;
use crate::Result;
use std::fmt;
use std::sync::Arc;

/// Hook run when the owning container closes
pub type CloseHook = Box<dyn FnOnce() -> Result<()> + Send>;

/// Installs components into a container under construction
pub trait ConfigurationUnit: Send + Sync {
    fn id(&self) -> &str;

    fn configure(&self, registrar: &mut Registrar<'_>) -> Result<()>;
}

/// Shared handle to a unit
pub type SharedUnit = Arc<dyn ConfigurationUnit>;

impl fmt::Debug for dyn ConfigurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationUnit").field("id", &self.id()).finish()
    }
}

/// Unit backed by a closure
pub struct FnUnit<F> {
    id: String,
    configure: F,
}

impl<F> ConfigurationUnit for FnUnit<F>
where
    F: Fn(&mut Registrar<'_>) -> Result<()> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn configure(&self, registrar: &mut Registrar<'_>) -> Result<()> {
        (self.configure)(registrar)
    }
}

/// Build a unit from a closure
pub fn unit<F>(id: impl Into<String>, configure: F) -> SharedUnit
where
    F: Fn(&mut Registrar<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnUnit {
        id: id.into(),
        configure,
    })
}

/// Registration surface handed to units while a container is built
pub struct Registrar<'a> {
    context: &'a str,
    environment: &'a Arc<Environment>,
    parent: Option<&'a Arc<Container>>,
    components: &'a mut ComponentTable,
    close_hooks: &'a mut Vec<CloseHook>,
}

impl<'a> Registrar<'a> {
    pub(crate) fn new(
        context: &'a str,
        environment: &'a Arc<Environment>,
        parent: Option<&'a Arc<Container>>,
        components: &'a mut ComponentTable,
        close_hooks: &'a mut Vec<CloseHook>,
    ) -> Self {
        Self {
            context,
            environment,
            parent,
            components,
            close_hooks,
        }
    }

    /// Name of the container being built
    pub fn context_name(&self) -> &str {
        self.context
    }

    pub fn environment(&self) -> &Arc<Environment> {
        self.environment
    }

    /// Register `component` as a provider of `T`
    ///
    /// Component names are unique within a container.
    pub fn register<T>(&mut self, name: impl Into<String>, component: Arc<T>) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.components.insert(self.context, name.into(), component)
    }

    /// Run `hook` when the container closes
    pub fn on_close(&mut self, hook: impl FnOnce() -> Result<()> + Send + 'static) {
        self.close_hooks.push(Box::new(hook));
    }

    /// Unique provider of `T` registered so far, falling back to the parent
    pub fn get<T>(&self) -> Result<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.components.unique::<T>(self.context)? {
            Some(component) => Ok(Some(component)),
            None => match self.parent {
                Some(parent) => parent.get::<T>(),
                None => Ok(None),
            },
        }
    }
}

/// Id of the baseline unit installed in every named context
pub const PLACEHOLDER_UNIT_ID: &str = "placeholder-resolver";

/// Resolves `${...}` placeholders against a container's environment
#[derive(Debug)]
pub struct PlaceholderResolver {
    environment: Arc<Environment>,
}

impl PlaceholderResolver {
    pub fn new(environment: Arc<Environment>) -> Self {
        Self { environment }
    }

    pub fn resolve(&self, text: &str) -> Result<String> {
        self.environment.resolve_placeholders(text)
    }
}

/// Baseline unit registering a [`PlaceholderResolver`]
pub fn placeholder_unit() -> SharedUnit {
    unit(PLACEHOLDER_UNIT_ID, |registrar| {
        let resolver = PlaceholderResolver::new(registrar.environment().clone());
        registrar.register("placeholderResolver", Arc::new(resolver))
    })
}
