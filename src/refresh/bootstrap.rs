//! Scratch Bootstrap Run
//!
//! Runs configuration source discovery against a throwaway environment. The
//! run builds a `bootstrap` container holding the bootstrap layers and a
//! child container whose environment is the scratch environment; both are
//! closed when the run is dropped.

use crate::context::{unit, Container};
use crate::environment::{
    CompositePropertySource, Environment, PropertySourceLocator, SharedSource,
    DEFAULT_PROPERTIES_SOURCE,
};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Marker layer seeding the scratch environment, stripped before reconciling
pub const REFRESH_ARGS_SOURCE: &str = "refreshArgs";
/// Composite layer holding everything the bootstrap locators found
pub const BOOTSTRAP_PROPERTIES_SOURCE: &str = "bootstrapProperties";

pub const BOOTSTRAP_CONTEXT: &str = "bootstrap";
pub const SCRATCH_CONTEXT: &str = "refresh-scratch";

pub type SharedLocator = Arc<dyn PropertySourceLocator>;

/// Configuration source discovery used by refreshes
#[derive(Debug, Clone, Default)]
pub struct ConfigBootstrap {
    bootstrap_locators: Vec<SharedLocator>,
    locators: Vec<SharedLocator>,
}

impl ConfigBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator for application layers, added ahead of `defaultProperties`
    pub fn with_locator(mut self, locator: SharedLocator) -> Self {
        self.locators.push(locator);
        self
    }

    /// Locator whose layers are grouped into the `bootstrapProperties` composite
    pub fn with_bootstrap_locator(mut self, locator: SharedLocator) -> Self {
        self.bootstrap_locators.push(locator);
        self
    }

    /// Discover sources into `environment`
    ///
    /// The returned run must be kept alive while the environment is read;
    /// dropping it tears the scratch containers down. A failed run is torn
    /// down before the error is returned.
    pub fn run(&self, environment: Arc<Environment>) -> Result<BootstrapRun> {
        let mut run = BootstrapRun {
            environment,
            leaf: None,
        };
        self.populate(&mut run)?;
        Ok(run)
    }

    /// Build the run's containers, recording each one as it comes up
    fn populate(&self, run: &mut BootstrapRun) -> Result<()> {
        let environment = run.environment.clone();
        let bootstrap_locators = self.bootstrap_locators.clone();
        let seed = environment.clone();
        let bootstrap = Container::builder(BOOTSTRAP_CONTEXT)
            .unit(unit("bootstrap-locators", move |registrar| {
                let mut composite = CompositePropertySource::new(BOOTSTRAP_PROPERTIES_SOURCE);
                for locator in &bootstrap_locators {
                    for source in locator.locate(&seed)? {
                        composite.add_property_source(source);
                    }
                }
                registrar.register("bootstrapProperties", Arc::new(composite))
            }))
            .refresh()?;
        run.leaf = Some(bootstrap.clone());

        let locators = self.locators.clone();
        let scratch = Container::builder(SCRATCH_CONTEXT)
            .environment(environment)
            .parent(Some(bootstrap))
            .unit(unit("config-data", move |registrar| {
                let environment = registrar.environment().clone();
                if let Some(bootstrap) = registrar.get::<CompositePropertySource>()? {
                    if !bootstrap.sources().is_empty() {
                        environment.add_first(Arc::new(bootstrap.as_ref().clone()));
                    }
                }
                for locator in &locators {
                    let sources = locator.locate(&environment)?;
                    debug!(locator = ?locator, sources = sources.len(), "Located property sources");
                    for source in sources {
                        insert_located(&environment, source)?;
                    }
                }
                Ok(())
            }))
            .refresh()?;
        run.leaf = Some(scratch);
        Ok(())
    }
}

fn insert_located(environment: &Environment, source: SharedSource) -> Result<()> {
    environment.with_sources_mut(|sources| {
        if sources.contains(DEFAULT_PROPERTIES_SOURCE) {
            sources.add_before(DEFAULT_PROPERTIES_SOURCE, source)
        } else {
            sources.add_last(source);
            Ok(())
        }
    })
}

/// Containers created by one scratch run
pub struct BootstrapRun {
    environment: Arc<Environment>,
    leaf: Option<Arc<Container>>,
}

impl fmt::Debug for BootstrapRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapRun")
            .field("layers", &self.environment.property_sources().names())
            .field("leaf", &self.leaf.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl BootstrapRun {
    /// Scratch environment populated by the run
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Close the run's containers, leaf first, ignoring close failures
    pub fn close(&mut self) {
        let mut current = self.leaf.take();
        while let Some(context) = current {
            if let Err(e) = context.close() {
                warn!(context = %context.name(), error = %e, "Failed to close scratch context");
            }
            current = context.parent().cloned();
        }
    }
}

impl Drop for BootstrapRun {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::MapPropertySource;
    use serde_json::json;

    #[derive(Debug)]
    struct StaticLocator(Vec<(&'static str, &'static str, i64)>);

    impl PropertySourceLocator for StaticLocator {
        fn locate(&self, _environment: &Environment) -> Result<Vec<SharedSource>> {
            Ok(self
                .0
                .iter()
                .map(|(name, key, value)| MapPropertySource::singleton(*name, *key, *value).into_shared())
                .collect())
        }
    }

    #[derive(Debug)]
    struct FailingLocator;

    impl PropertySourceLocator for FailingLocator {
        fn locate(&self, _environment: &Environment) -> Result<Vec<SharedSource>> {
            anyhow::bail!("config server unreachable")
        }
    }

    #[test]
    fn test_located_sources_land_before_defaults() {
        let environment = Arc::new(Environment::new());
        environment.add_last(MapPropertySource::singleton(DEFAULT_PROPERTIES_SOURCE, "d", 1).into_shared());

        let bootstrap = ConfigBootstrap::new()
            .with_bootstrap_locator(Arc::new(StaticLocator(vec![("remote", "r", 1)])))
            .with_locator(Arc::new(StaticLocator(vec![("high", "k", 1), ("low", "k", 2)])));

        let run = bootstrap.run(environment.clone()).unwrap();
        assert_eq!(
            run.environment().property_sources().names(),
            vec![BOOTSTRAP_PROPERTIES_SOURCE, "high", "low", DEFAULT_PROPERTIES_SOURCE]
        );
        assert_eq!(environment.get_property("r"), Some(json!(1)));
        assert_eq!(environment.get_property("k"), Some(json!(1)));
    }

    #[test]
    fn test_drop_closes_every_container() {
        let environment = Arc::new(Environment::new());
        let run = ConfigBootstrap::new().run(environment).unwrap();
        let leaf = run.leaf.clone().unwrap();
        let parent = leaf.parent().cloned().unwrap();

        drop(run);
        assert!(!leaf.is_active());
        assert!(!parent.is_active());
    }

    #[test]
    fn test_failed_run_reports_error() {
        let environment = Arc::new(Environment::new());
        let err = ConfigBootstrap::new()
            .with_locator(Arc::new(FailingLocator))
            .run(environment.clone())
            .unwrap_err();

        assert!(format!("{:#}", err).contains("config server unreachable"));
        assert!(environment.property_sources().is_empty());
    }

    #[test]
    fn test_failed_run_closes_bootstrap_container() {
        let bootstrap = ConfigBootstrap::new().with_locator(Arc::new(FailingLocator));
        let mut run = BootstrapRun {
            environment: Arc::new(Environment::new()),
            leaf: None,
        };

        assert!(bootstrap.populate(&mut run).is_err());
        let parent = run.leaf.clone().unwrap();
        assert_eq!(parent.name(), BOOTSTRAP_CONTEXT);
        assert!(parent.is_active());

        drop(run);
        assert!(!parent.is_active());
    }
}
