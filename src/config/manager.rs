//! Configuration Manager

use super::Config;
use crate::context::unit::PLACEHOLDER_UNIT_ID;
use crate::context::{SharedUnit, Specification, UnitCatalog, DEFAULT_PREFIX};
use crate::error::ContextError;
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, falling back to defaults when it is missing
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from `CTXHUB_*` environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Override fields from environment-style variables
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(paths) = var("CTXHUB_SEARCH_PATHS") {
            self.sources.search_paths = std::env::split_paths(&paths).collect();
        }

        if let Some(base_name) = var("CTXHUB_BASE_NAME") {
            self.sources.base_name = base_name;
        }

        if let Some(profiles) = var("CTXHUB_PROFILES") {
            self.sources.profiles = profiles
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(enabled) = var("CTXHUB_WATCH_ENABLED") {
            self.watch.enabled = enabled
                .parse::<bool>()
                .with_context(|| format!("Invalid CTXHUB_WATCH_ENABLED: {}", enabled))?;
        }

        if let Some(debounce) = var("CTXHUB_WATCH_DEBOUNCE") {
            self.watch.debounce = humantime::parse_duration(&debounce)
                .with_context(|| format!("Invalid CTXHUB_WATCH_DEBOUNCE: {}", debounce))?;
        }

        if let Some(bind_addr) = var("CTXHUB_MANAGEMENT_BIND") {
            self.management.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid CTXHUB_MANAGEMENT_BIND: {}", bind_addr))?;
        }

        if let Some(api_key) = var("CTXHUB_API_KEY") {
            self.management.auth.api_key = Some(api_key);
        }

        if let Some(log_level) = var("CTXHUB_LOG_LEVEL") {
            self.monitoring.log_level = log_level;
        }

        if let Some(timeout) = var("CTXHUB_SHUTDOWN_TIMEOUT") {
            self.shutdown_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid CTXHUB_SHUTDOWN_TIMEOUT: {}", timeout))?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_sources_config()
            .with_context(|| "Sources configuration validation failed")?;

        self.validate_watch_config()
            .with_context(|| "Watch configuration validation failed")?;

        self.validate_management_config()
            .with_context(|| "Management configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        self.validate_contexts_config()
            .with_context(|| "Contexts configuration validation failed")?;

        if self.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_sources_config(&self) -> Result<()> {
        let base_name = &self.sources.base_name;
        if base_name.is_empty() {
            bail!("sources.base_name must not be empty");
        }

        if base_name.contains(&['/', '\\', '.'][..]) {
            bail!("sources.base_name must be a plain file stem: {}", base_name);
        }

        for (i, profile) in self.sources.profiles.iter().enumerate() {
            if profile.trim().is_empty() {
                bail!("Profile {} is empty", i);
            }
        }

        Ok(())
    }

    fn validate_watch_config(&self) -> Result<()> {
        if self.watch.debounce > Duration::from_secs(60) {
            bail!("watch.debounce cannot exceed 1 minute");
        }

        Ok(())
    }

    fn validate_management_config(&self) -> Result<()> {
        let auth = &self.management.auth;
        if self.management.enabled && auth.enabled && auth.api_key.is_none() && auth.basic_auth.is_none() {
            bail!("management.auth is enabled but neither api_key nor basic_auth is configured");
        }

        if let Some(basic) = &auth.basic_auth {
            if basic.username.is_empty() || basic.password.is_empty() {
                bail!("management.auth.basic_auth requires a username and a password");
            }
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    fn validate_contexts_config(&self) -> Result<()> {
        if self.contexts.kind.is_empty() {
            bail!("contexts.kind must not be empty");
        }

        if self.contexts.property_name.is_empty() {
            bail!("contexts.property_name must not be empty");
        }

        let catalog = UnitCatalog::with_builtins();
        if self.contexts.default_unit == PLACEHOLDER_UNIT_ID {
            bail!("contexts.default_unit cannot be '{}', it is always installed", PLACEHOLDER_UNIT_ID);
        }

        if !catalog.contains(&self.contexts.default_unit) {
            bail!("contexts.default_unit '{}' is not a known unit", self.contexts.default_unit);
        }

        let mut seen = HashSet::new();
        for (i, spec) in self.contexts.specifications.iter().enumerate() {
            if spec.name.is_empty() || spec.name == DEFAULT_PREFIX {
                bail!("Context specification {} has an invalid name: '{}'", i, spec.name);
            }

            if !seen.insert(spec.name.as_str()) {
                bail!("Context specification '{}' is declared more than once", spec.name);
            }

            if spec.units.contains(&self.contexts.default_unit) {
                bail!(
                    "Context specification '{}' lists '{}', which is already the default unit",
                    spec.name,
                    self.contexts.default_unit
                );
            }
        }

        self.context_specifications(&catalog)?;
        Ok(())
    }

    /// Resolve the unit installed into every context
    pub fn context_default_unit(&self, catalog: &UnitCatalog) -> Result<SharedUnit> {
        match catalog.get(&self.contexts.default_unit) {
            Some(unit) => Ok(unit),
            None => bail!(ContextError::UnknownUnit(self.contexts.default_unit.clone())),
        }
    }

    /// Resolve the declared specifications against `catalog`
    pub fn context_specifications(&self, catalog: &UnitCatalog) -> Result<Vec<Specification>> {
        self.contexts
            .specifications
            .iter()
            .map(|spec| {
                catalog
                    .resolve(&spec.name, &spec.units)
                    .with_context(|| format!("Context specification '{}'", spec.name))
            })
            .collect()
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        log_level: Option<&str>,
        profiles: &[String],
        search_paths: &[PathBuf],
        no_watch: bool,
        management_bind: Option<&str>,
    ) {
        if let Some(level) = log_level {
            self.monitoring.log_level = level.to_string();
            tracing::info!("CLI override: log level set to {}", level);
        }

        if !profiles.is_empty() {
            self.sources.profiles = profiles.to_vec();
            tracing::info!("CLI override: profiles set to {:?}", profiles);
        }

        if !search_paths.is_empty() {
            self.sources.search_paths = search_paths.to_vec();
            tracing::info!("CLI override: search paths set to {:?}", search_paths);
        }

        if no_watch {
            self.watch.enabled = false;
            tracing::info!("CLI override: file watching disabled");
        }

        if let Some(bind_str) = management_bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.management.bind_addr = addr;
                tracing::info!("CLI override: management bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid management bind address provided: {}", bind_str);
            }
        }
    }
}
