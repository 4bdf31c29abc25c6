//! Management API Types

use crate::context::ContextInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::SystemTime;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: SystemTime::now(),
        }
    }
}

/// Daemon status information
#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub uptime_seconds: u64,
    pub version: String,
    pub refresher_id: String,
    pub active_profiles: Vec<String>,
    pub property_sources: usize,
    pub contexts: usize,
    pub scope_generation: u64,
}

/// Keys changed by a refresh
#[derive(Debug, Serialize)]
pub struct RefreshResult {
    pub keys: BTreeSet<String>,
    /// Present when the refresh scope was invalidated too
    pub scope_generation: Option<u64>,
}

/// One layer of the live environment
#[derive(Debug, Serialize)]
pub struct PropertySourceView {
    pub name: String,
    /// `None` for layers that cannot list their keys
    pub properties: Option<BTreeMap<String, Value>>,
}

/// The live environment, highest priority layer first
#[derive(Debug, Serialize)]
pub struct EnvironmentView {
    pub active_profiles: Vec<String>,
    pub default_profiles: Vec<String>,
    pub property_sources: Vec<PropertySourceView>,
}

/// Resolved value of a single key
#[derive(Debug, Serialize)]
pub struct PropertyView {
    pub key: String,
    pub value: Value,
    /// Name of the layer that supplied the value
    pub source: String,
}

/// Named contexts and the specifications they can be built from
#[derive(Debug, Serialize)]
pub struct ContextsSummary {
    pub kind: String,
    pub specifications: Vec<String>,
    pub contexts: Vec<ContextInfo>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub checks: HashMap<String, CheckResult>,
    pub timestamp: SystemTime,
}

/// Individual health check result
#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: String,
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// API authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiAuthConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub basic_auth: Option<BasicAuthConfig>,
}

/// Basic authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

impl Default for ApiAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: Some("default-api-key-change-me".to_string()),
            basic_auth: None,
        }
    }
}
