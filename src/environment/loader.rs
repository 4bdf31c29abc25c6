//! Property Source Loading
//!
//! Locators discover property sources for an environment. The file locator
//! reads `<name>.toml` / `<name>.yaml` documents (plus profile specific
//! variants) from a list of search directories.

use super::resolver::{profiles_from_value, Environment, ACTIVE_PROFILES_PROPERTY};
use super::types::{MapPropertySource, PropertyValue, SharedSource, COMMAND_LINE_SOURCE};
use crate::Result;
use anyhow::{bail, Context};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Discovers property sources for an environment
///
/// Locators must not mutate anything outside the environment they are given
/// and must be safe to invoke repeatedly.
pub trait PropertySourceLocator: Send + Sync + fmt::Debug {
    /// Sources ordered from highest to lowest priority
    fn locate(&self, environment: &Environment) -> Result<Vec<SharedSource>>;
}

/// Extensions understood by the file locator, in lookup order
pub const SUPPORTED_EXTENSIONS: &[&str] = &["toml", "yaml", "yml"];

/// Loads configuration documents from a set of directories
#[derive(Debug, Clone)]
pub struct FilePropertySourceLocator {
    search_paths: Vec<PathBuf>,
    base_name: String,
}

impl FilePropertySourceLocator {
    pub fn new(search_paths: Vec<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            search_paths,
            base_name: base_name.into(),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Whether `path` is a document this locator would read
    pub fn matches(&self, path: &Path) -> bool {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return false;
        };
        let known_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        let prefix = format!("{}-", self.base_name);
        known_extension && (stem == self.base_name || stem.starts_with(&prefix))
    }

    fn candidates(&self, stem: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        // Later search paths override earlier ones.
        for dir in self.search_paths.iter().rev() {
            for ext in SUPPORTED_EXTENSIONS {
                let path = dir.join(format!("{}.{}", stem, ext));
                if path.is_file() {
                    found.push(path);
                }
            }
        }
        found
    }

    fn load_stem(&self, stem: &str) -> Result<Vec<SharedSource>> {
        let mut sources = Vec::new();
        for path in self.candidates(stem) {
            let properties = load_document(&path)?;
            debug!(path = %path.display(), keys = properties.len(), "Loaded configuration document");
            sources.push(
                MapPropertySource::new(format!("config: [{}]", path.display()), properties)
                    .into_shared(),
            );
        }
        Ok(sources)
    }
}

impl PropertySourceLocator for FilePropertySourceLocator {
    fn locate(&self, environment: &Environment) -> Result<Vec<SharedSource>> {
        let base = self.load_stem(&self.base_name)?;

        // Base documents may select profiles when the environment does not.
        let mut profiles = environment.active_profiles();
        if profiles.is_empty() {
            profiles = base
                .iter()
                .find_map(|source| source.get_property(ACTIVE_PROFILES_PROPERTY))
                .map(|value| profiles_from_value(&value))
                .unwrap_or_default();
        }

        let mut sources = Vec::new();
        for profile in profiles.iter().rev() {
            sources.extend(self.load_stem(&format!("{}-{}", self.base_name, profile))?);
        }
        sources.extend(base);

        info!(
            base_name = %self.base_name,
            profiles = ?profiles,
            documents = sources.len(),
            "Located configuration documents"
        );
        Ok(sources)
    }
}

/// Read a TOML or YAML document into dotted keys
pub fn load_document(path: &Path) -> Result<BTreeMap<String, PropertyValue>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let document: Value = match extension {
        "toml" => {
            let value: toml::Value = toml::from_str(&content)
                .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
            serde_json::to_value(value)
                .with_context(|| format!("Failed to convert configuration file: {}", path.display()))?
        }
        "yaml" | "yml" => {
            if content.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_yaml::from_str(&content).with_context(|| {
                    format!("Failed to parse configuration file: {}", path.display())
                })?
            }
        }
        other => bail!("Unsupported configuration format '{}': {}", other, path.display()),
    };

    Ok(flatten_document(document))
}

/// Flatten nested tables to `a.b.c` keys and arrays to `a[0]`
pub fn flatten_document(document: Value) -> BTreeMap<String, PropertyValue> {
    let mut result = BTreeMap::new();
    match document {
        Value::Object(map) => {
            for (key, value) in map {
                flatten_into(&key, value, &mut result);
            }
        }
        Value::Null => {}
        other => {
            result.insert(String::new(), other);
        }
    }
    result
}

fn flatten_into(prefix: &str, value: Value, result: &mut BTreeMap<String, PropertyValue>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(&format!("{}.{}", prefix, key), child, result);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, child) in items.into_iter().enumerate() {
                flatten_into(&format!("{}[{}]", prefix, idx), child, result);
            }
        }
        other => {
            result.insert(prefix.to_string(), other);
        }
    }
}

/// Build the command line layer from `key=value` arguments
///
/// A leading `--` is stripped; a bare `--flag` is recorded as `true`.
pub fn command_line_source<S: AsRef<str>>(args: &[S]) -> Result<MapPropertySource> {
    let mut properties = BTreeMap::new();
    for arg in args {
        let arg = arg.as_ref();
        let trimmed = arg.strip_prefix("--").unwrap_or(arg);
        let (key, value) = match trimmed.split_once('=') {
            Some((key, value)) => (key.trim(), Value::String(value.to_string())),
            None => (trimmed.trim(), Value::Bool(true)),
        };
        if key.is_empty() {
            bail!("Invalid command line property: '{}'", arg);
        }
        properties.insert(key.to_string(), value);
    }
    Ok(MapPropertySource::new(COMMAND_LINE_SOURCE, properties))
}
