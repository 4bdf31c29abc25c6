//! Configuration Types

use crate::management::types::ApiAuthConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub watch: WatchConfig,
    pub management: ManagementConfig,
    pub monitoring: MonitoringConfig,
    pub contexts: ContextsConfig,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Where application configuration documents are found
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Directories searched for documents; later entries win
    pub search_paths: Vec<PathBuf>,
    /// Document stem, `application` reads `application.toml` and friends
    pub base_name: String,
    /// Active profiles; empty means "use `profiles.active` or the default"
    pub profiles: Vec<String>,
    /// Lowest priority layer (`defaultProperties`)
    pub default_properties: BTreeMap<String, Value>,
}

/// File watching
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
}

/// Management API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagementConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
    pub auth: ApiAuthConfig,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub prometheus_enabled: bool,
    /// Separate scrape endpoint; metrics are always served by the management API
    pub metrics_addr: Option<SocketAddr>,
}

/// Named context factory configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextsConfig {
    /// Factory kind, used for display names and the name-binding layer
    pub kind: String,
    /// Property bound to each context's name
    pub property_name: String,
    /// Catalog id of the unit installed into every context
    pub default_unit: String,
    pub specifications: Vec<ContextSpecConfig>,
}

/// Units declared for one context name (or `default.*` for all)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextSpecConfig {
    pub name: String,
    #[serde(default)]
    pub units: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: SourcesConfig::default(),
            watch: WatchConfig::default(),
            management: ManagementConfig::default(),
            monitoring: MonitoringConfig::default(),
            contexts: ContextsConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![PathBuf::from("config")],
            base_name: "application".to_string(),
            profiles: vec![],
            default_properties: BTreeMap::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: Duration::from_millis(250),
        }
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            auth: ApiAuthConfig::default(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            prometheus_enabled: true,
            metrics_addr: None,
        }
    }
}

impl Default for ContextsConfig {
    fn default() -> Self {
        Self {
            kind: "context".to_string(),
            property_name: crate::context::DEFAULT_PROPERTY_NAME.to_string(),
            default_unit: crate::context::catalog::CONTEXT_PROPERTIES_UNIT_ID.to_string(),
            specifications: vec![],
        }
    }
}
