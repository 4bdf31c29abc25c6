//! Live Environment
//!
//! The environment owns a mutable stack of property sources and answers
//! lookups by scanning it from highest to lowest priority. A child
//! environment falls back to its parent when a key is not defined locally.

use super::sources::PropertySources;
use super::types::{
    MapPropertySource, PropertyValue, RandomValuePropertySource, SharedSource,
    SYSTEM_ENVIRONMENT_SOURCE,
};
use crate::error::ContextError;
use crate::Result;
use anyhow::{bail, Context};
use parking_lot::RwLock;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// Property holding a comma separated list of active profiles
pub const ACTIVE_PROFILES_PROPERTY: &str = "profiles.active";
pub const DEFAULT_PROFILE: &str = "default";

const MAX_PLACEHOLDER_DEPTH: usize = 16;

fn placeholder_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let compiled = Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}")
        .context("Invalid placeholder pattern")?;
    Ok(PATTERN.get_or_init(|| compiled))
}

/// Layered configuration visible to a context
#[derive(Debug)]
pub struct Environment {
    sources: RwLock<PropertySources>,
    active_profiles: RwLock<Option<Vec<String>>>,
    default_profiles: RwLock<Vec<String>>,
    parent: Option<Arc<Environment>>,
}

impl Environment {
    /// An environment with no sources
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(PropertySources::new()),
            active_profiles: RwLock::new(None),
            default_profiles: RwLock::new(vec![DEFAULT_PROFILE.to_string()]),
            parent: None,
        }
    }

    /// An empty environment that falls back to `parent`
    pub fn with_parent(parent: Arc<Environment>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    /// Environment seeded with process environment variables and random values
    pub fn standard() -> Self {
        let env = Self::new();
        {
            let mut sources = env.sources.write();
            sources.add_last(system_environment().into_shared());
            sources.add_last(Arc::new(RandomValuePropertySource::new()));
        }
        env
    }

    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    /// Copy of the current source stack
    pub fn property_sources(&self) -> PropertySources {
        self.sources.read().clone()
    }

    /// Mutate the source stack under the write lock
    pub fn with_sources_mut<R>(&self, f: impl FnOnce(&mut PropertySources) -> R) -> R {
        let mut sources = self.sources.write();
        f(&mut sources)
    }

    pub fn add_first(&self, source: SharedSource) {
        self.sources.write().add_first(source);
    }

    pub fn add_last(&self, source: SharedSource) {
        self.sources.write().add_last(source);
    }

    pub fn get_property(&self, key: &str) -> Option<PropertyValue> {
        let local = {
            let sources = self.sources.read();
            let found = sources.iter().find_map(|source| source.get_property(key));
            found
        };
        match local {
            Some(value) => Some(value),
            None => self.parent.as_ref().and_then(|parent| parent.get_property(key)),
        }
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.get_property(key).is_some()
    }

    /// Property rendered as a string; placeholders in string values are resolved
    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get_property(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => self.resolve_placeholders(&s).map(Some),
            Some(other) => Ok(Some(other.to_string())),
        }
    }

    /// Bind a property to `T` through serde
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_property(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .with_context(|| format!("Failed to bind property '{}'", key)),
        }
    }

    /// Replace `${key}` and `${key:default}` placeholders in `text`
    pub fn resolve_placeholders(&self, text: &str) -> Result<String> {
        self.resolve_nested(text, 0)
    }

    fn resolve_nested(&self, text: &str, depth: usize) -> Result<String> {
        if depth > MAX_PLACEHOLDER_DEPTH {
            bail!(ContextError::UnresolvablePlaceholder(text.to_string()));
        }

        let pattern = placeholder_pattern()?;
        let mut resolved = String::with_capacity(text.len());
        let mut last = 0;
        for caps in pattern.captures_iter(text) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let key = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            resolved.push_str(&text[last..whole.start]);

            let value = match self.get_property(key) {
                Some(Value::String(s)) => self.resolve_nested(&s, depth + 1)?,
                Some(Value::Null) | None => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => bail!(ContextError::UnresolvablePlaceholder(key.to_string())),
                },
                Some(other) => other.to_string(),
            };
            trace!(key = %key, "Resolved placeholder");
            resolved.push_str(&value);
            last = whole.end;
        }
        resolved.push_str(&text[last..]);
        Ok(resolved)
    }

    /// Explicit profiles, else the `profiles.active` property
    pub fn active_profiles(&self) -> Vec<String> {
        if let Some(profiles) = self.active_profiles.read().as_ref() {
            return profiles.clone();
        }
        self.get_property(ACTIVE_PROFILES_PROPERTY)
            .map(|value| profiles_from_value(&value))
            .unwrap_or_default()
    }

    pub fn set_active_profiles<S: Into<String>>(&self, profiles: impl IntoIterator<Item = S>) {
        *self.active_profiles.write() = Some(profiles.into_iter().map(Into::into).collect());
    }

    pub fn default_profiles(&self) -> Vec<String> {
        self.default_profiles.read().clone()
    }

    pub fn set_default_profiles<S: Into<String>>(&self, profiles: impl IntoIterator<Item = S>) {
        *self.default_profiles.write() = profiles.into_iter().map(Into::into).collect();
    }

    /// Active profiles, or the defaults when none are active
    pub fn effective_profiles(&self) -> Vec<String> {
        let active = self.active_profiles();
        if active.is_empty() {
            self.default_profiles()
        } else {
            active
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Profile names from a comma separated string or a list
pub fn profiles_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::String(list) => list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Process environment variables as an enumerable source
pub fn system_environment() -> MapPropertySource {
    MapPropertySource::from_pairs(
        SYSTEM_ENVIRONMENT_SOURCE,
        std::env::vars().map(|(k, v)| (k, Value::String(v))),
    )
}
