//! Context Types

use super::container::Container;
use super::unit::SharedUnit;
use serde::Serialize;
use std::time::SystemTime;

/// Specifications whose name starts with this prefix apply to every context
pub const DEFAULT_PREFIX: &str = "default.";

/// Property bound to the context name by default
pub const DEFAULT_PROPERTY_NAME: &str = "ctxhub.context.name";

/// Units to install into the context called `name`
#[derive(Debug, Clone)]
pub struct Specification {
    name: String,
    units: Vec<SharedUnit>,
}

impl Specification {
    pub fn new(name: impl Into<String>, units: Vec<SharedUnit>) -> Self {
        Self {
            name: name.into(),
            units,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> &[SharedUnit] {
        &self.units
    }

    /// Whether this specification applies to every context
    pub fn applies_to_all(&self) -> bool {
        self.name.starts_with(DEFAULT_PREFIX)
    }
}

/// Summary of a cached context
#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub name: String,
    pub display_name: String,
    pub active: bool,
    pub components: Vec<ComponentInfo>,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub name: String,
    pub capability: String,
}

impl From<&Container> for ContextInfo {
    fn from(container: &Container) -> Self {
        Self {
            name: container.name().to_string(),
            display_name: container.display_name().to_string(),
            active: container.is_active(),
            components: container
                .component_names()
                .into_iter()
                .map(|(name, capability)| ComponentInfo {
                    name,
                    capability: capability.to_string(),
                })
                .collect(),
            created_at: container.created_at(),
        }
    }
}
