//! Unit Catalog
//!
//! Resolves unit ids named in the daemon configuration to units.

use super::types::Specification;
use super::unit::{placeholder_unit, unit, SharedUnit, PLACEHOLDER_UNIT_ID};
use crate::environment::{Environment, PropertyValue};
use crate::error::ContextError;
use crate::Result;
use anyhow::bail;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const CONTEXT_PROPERTIES_UNIT_ID: &str = "context-properties";

/// Prefix under which per-context properties live
pub const CONTEXT_PROPERTIES_PREFIX: &str = "contexts";

/// Live view of `contexts.<name>.*` for one context
///
/// Values are read from the environment on every call, so they follow
/// refreshes without rebuilding the context.
#[derive(Debug)]
pub struct ContextProperties {
    context: String,
    environment: Arc<Environment>,
}

impl ContextProperties {
    pub fn new(context: impl Into<String>, environment: Arc<Environment>) -> Self {
        Self {
            context: context.into(),
            environment,
        }
    }

    pub fn prefix(&self) -> String {
        format!("{}.{}.", CONTEXT_PROPERTIES_PREFIX, self.context)
    }

    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.environment.get_property(&format!("{}{}", self.prefix(), key))
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.environment.get_string(&format!("{}{}", self.prefix(), key))
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.environment.get_as(&format!("{}{}", self.prefix(), key))
    }

    /// Every property under the prefix, with the prefix stripped
    pub fn all(&self) -> BTreeMap<String, PropertyValue> {
        let prefix = self.prefix();
        let mut keys = BTreeSet::new();
        let mut level = Some(&self.environment);
        while let Some(environment) = level {
            let view = crate::environment::flatten(&environment.property_sources(), &Default::default());
            keys.extend(view.into_keys().filter(|key| key.starts_with(&prefix)));
            level = environment.parent();
        }

        keys.into_iter()
            .filter_map(|key| {
                let value = self.environment.get_property(&key)?;
                Some((key[prefix.len()..].to_string(), value))
            })
            .collect()
    }
}

fn context_properties_unit() -> SharedUnit {
    unit(CONTEXT_PROPERTIES_UNIT_ID, |registrar| {
        let properties =
            ContextProperties::new(registrar.context_name(), registrar.environment().clone());
        registrar.register("contextProperties", Arc::new(properties))
    })
}

/// Unit lookup by id
#[derive(Debug, Clone)]
pub struct UnitCatalog {
    units: BTreeMap<String, SharedUnit>,
}

impl UnitCatalog {
    /// An empty catalog
    pub fn new() -> Self {
        Self {
            units: BTreeMap::new(),
        }
    }

    /// A catalog holding the built-in units
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(context_properties_unit());
        catalog.register(placeholder_unit());
        catalog
    }

    /// Add `unit`, replacing any unit with the same id
    pub fn register(&mut self, unit: SharedUnit) {
        self.units.insert(unit.id().to_string(), unit);
    }

    pub fn get(&self, id: &str) -> Option<SharedUnit> {
        self.units.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    /// Build a specification from unit ids
    pub fn resolve(&self, name: &str, ids: &[String]) -> Result<Specification> {
        let mut units = Vec::with_capacity(ids.len());
        for id in ids {
            // Installed for every context anyway.
            if id == PLACEHOLDER_UNIT_ID {
                continue;
            }
            match self.get(id) {
                Some(unit) => units.push(unit),
                None => bail!(ContextError::UnknownUnit(id.clone())),
            }
        }
        Ok(Specification::new(name, units))
    }
}

impl Default for UnitCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}
