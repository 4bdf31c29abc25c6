//! Context Module
//!
//! Isolated component containers and the factory that caches one container
//! per name.

pub mod catalog;
pub mod container;
pub mod factory;
pub mod types;
pub mod unit;

pub use catalog::{ContextProperties, UnitCatalog};
pub use container::{Container, ContainerBuilder};
pub use factory::NamedContextFactory;
pub use types::{ContextInfo, Specification, DEFAULT_PREFIX, DEFAULT_PROPERTY_NAME};
pub use unit::{unit, ConfigurationUnit, PlaceholderResolver, Registrar, SharedUnit};
