//! Property Source Types

use crate::Result;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Value stored in a property source
pub type PropertyValue = Value;

/// Shared handle to a property source
pub type SharedSource = Arc<dyn PropertySource>;

/// Command line arguments layer
pub const COMMAND_LINE_SOURCE: &str = "commandLineArgs";
/// Defaults supplied by the embedding application
pub const DEFAULT_PROPERTIES_SOURCE: &str = "defaultProperties";
pub const SYSTEM_PROPERTIES_SOURCE: &str = "systemProperties";
pub const SYSTEM_ENVIRONMENT_SOURCE: &str = "systemEnvironment";
pub const JNDI_SOURCE: &str = "jndiProperties";
pub const SERVLET_CONFIG_SOURCE: &str = "servletConfigInitParams";
pub const SERVLET_CONTEXT_SOURCE: &str = "servletContextInitParams";
/// Cache of resolved configuration properties
pub const CONFIGURATION_PROPERTIES_SOURCE: &str = "configurationProperties";
pub const RANDOM_SOURCE: &str = "random";

/// A named layer of configuration
///
/// Enumerable sources report their keys through [`PropertySource::property_names`];
/// opaque sources answer lookups but return `None` there and are ignored when
/// an environment is flattened.
pub trait PropertySource: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn get_property(&self, key: &str) -> Option<PropertyValue>;

    /// Keys this source can enumerate, or `None` when it cannot
    fn property_names(&self) -> Option<Result<Vec<String>>> {
        None
    }

    /// Sub-layers of a composite source, highest priority first
    fn nested(&self) -> Option<&[SharedSource]> {
        None
    }

    fn contains_property(&self, key: &str) -> bool {
        self.get_property(key).is_some()
    }
}

/// Enumerable source backed by an ordered map
#[derive(Debug, Clone, PartialEq)]
pub struct MapPropertySource {
    name: String,
    properties: BTreeMap<String, PropertyValue>,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>, properties: BTreeMap<String, PropertyValue>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// Build a source from key/value pairs
    pub fn from_pairs<K, V, I>(name: impl Into<String>, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<PropertyValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let properties = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(name, properties)
    }

    /// A source holding exactly one entry
    pub fn singleton(
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self::from_pairs(name, [(key.into(), value.into())])
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    pub fn into_shared(self) -> SharedSource {
        Arc::new(self)
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.get(key).cloned()
    }

    fn property_names(&self) -> Option<Result<Vec<String>>> {
        Some(Ok(self.properties.keys().cloned().collect()))
    }
}

/// Several sources exposed as one logical layer
#[derive(Debug, Clone)]
pub struct CompositePropertySource {
    name: String,
    sources: Vec<SharedSource>,
}

impl CompositePropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
        }
    }

    /// Append a sub-layer with the lowest priority so far
    pub fn add_property_source(&mut self, source: SharedSource) {
        self.sources.push(source);
    }

    /// Insert a sub-layer ahead of all others
    pub fn add_first_property_source(&mut self, source: SharedSource) {
        self.sources.insert(0, source);
    }

    pub fn sources(&self) -> &[SharedSource] {
        &self.sources
    }
}

impl PropertySource for CompositePropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_property(&self, key: &str) -> Option<PropertyValue> {
        self.sources.iter().find_map(|source| source.get_property(key))
    }

    fn property_names(&self) -> Option<Result<Vec<String>>> {
        let mut names = BTreeSet::new();
        for source in &self.sources {
            match source.property_names() {
                Some(Ok(keys)) => names.extend(keys),
                Some(Err(e)) => return Some(Err(e)),
                None => {}
            }
        }
        Some(Ok(names.into_iter().collect()))
    }

    fn nested(&self) -> Option<&[SharedSource]> {
        Some(&self.sources)
    }
}

/// Opaque source producing a fresh random value for `random.uuid`
#[derive(Debug, Clone)]
pub struct RandomValuePropertySource {
    name: String,
}

impl RandomValuePropertySource {
    const PREFIX: &'static str = "random.";

    pub fn new() -> Self {
        Self {
            name: RANDOM_SOURCE.to_string(),
        }
    }
}

impl Default for RandomValuePropertySource {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertySource for RandomValuePropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_property(&self, key: &str) -> Option<PropertyValue> {
        match key.strip_prefix(Self::PREFIX)? {
            "uuid" => Some(Value::String(uuid::Uuid::new_v4().to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_source_lookup() {
        let source = MapPropertySource::from_pairs("app", [("a", json!(1)), ("b", json!("x"))]);
        assert_eq!(source.name(), "app");
        assert_eq!(source.get_property("a"), Some(json!(1)));
        assert_eq!(source.get_property("missing"), None);
        assert_eq!(
            source.property_names().unwrap().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_composite_first_match_wins() {
        let mut composite = CompositePropertySource::new("bootstrap");
        composite.add_property_source(MapPropertySource::singleton("low", "k", 1).into_shared());
        composite.add_first_property_source(MapPropertySource::singleton("high", "k", 2).into_shared());

        assert_eq!(composite.get_property("k"), Some(json!(2)));
        assert_eq!(composite.nested().unwrap().len(), 2);
        assert_eq!(composite.property_names().unwrap().unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn test_random_source_is_opaque() {
        let random = RandomValuePropertySource::new();
        assert!(random.property_names().is_none());

        let first = random.get_property("random.uuid").unwrap();
        let second = random.get_property("random.uuid").unwrap();
        assert_ne!(first, second);
        assert!(random.get_property("random.other").is_none());
    }
}
