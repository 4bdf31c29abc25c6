//! ctxhub - named contexts and live configuration refresh daemon

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ctxhub::{
    config::{Config, ConfigManager, ConfigWatcher},
    context::{Container, NamedContextFactory, UnitCatalog},
    environment::{
        command_line_source, loader::flatten_document, Environment, FilePropertySourceLocator,
        MapPropertySource, DEFAULT_PROPERTIES_SOURCE,
    },
    management::{AppState, ManagementServer},
    metrics::{Metrics, MetricsServer},
    refresh::{ConfigBootstrap, ContextRefresher, EnvironmentChangeEvent, RefreshScope},
    ShutdownCoordinator,
};

/// CLI arguments for ctxhub
#[derive(Parser, Debug)]
#[command(name = "ctxhub")]
#[command(about = "ctxhub - named contexts and live configuration refresh")]
#[command(version)]
#[command(long_about = "
ctxhub - named contexts and live configuration refresh

Loads layered application configuration from TOML/YAML documents, keeps it
live as the files change, and hosts named child contexts that inherit it.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  CTXHUB_SEARCH_PATHS      - Directories searched for application documents
  CTXHUB_BASE_NAME         - Document stem (default: application)
  CTXHUB_PROFILES          - Comma separated active profiles
  CTXHUB_WATCH_ENABLED     - Watch documents for changes (true/false)
  CTXHUB_WATCH_DEBOUNCE    - Quiet period before a refresh (e.g., 250ms)
  CTXHUB_MANAGEMENT_BIND   - Management API address (e.g., 127.0.0.1:8080)
  CTXHUB_API_KEY           - Management API key
  CTXHUB_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
  CTXHUB_SHUTDOWN_TIMEOUT  - Context teardown timeout (e.g., 30s)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "ctxhub.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Active profile, may be repeated
    #[arg(short = 'p', long = "profile", help = "Active profile")]
    pub profiles: Vec<String>,

    /// Directory searched for application documents, may be repeated
    #[arg(long = "search-path", help = "Configuration search path")]
    pub search_paths: Vec<PathBuf>,

    /// Property override, may be repeated
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE", help = "Set a property")]
    pub set: Vec<String>,

    /// Disable file watching
    #[arg(long, help = "Disable file watching")]
    pub no_watch: bool,

    /// Management API bind address (overrides config file)
    #[arg(long, help = "Management API bind address")]
    pub management_bind: Option<String>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting ctxhub v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.log_level.as_deref(),
        &args.profiles,
        &args.search_paths,
        args.no_watch,
        args.management_bind.as_deref(),
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        log_summary(&config);
        info!("Configuration is valid");
        return Ok(());
    }

    log_summary(&config);

    let metrics = Arc::new(Metrics::new()?);
    let catalog = UnitCatalog::with_builtins();

    // Root environment: system environment, random values, overrides and defaults
    let environment = Arc::new(Environment::standard());
    if !args.set.is_empty() {
        environment.add_first(command_line_source(&args.set)?.into_shared());
    }
    if !config.sources.default_properties.is_empty() {
        let defaults = Value::Object(config.sources.default_properties.clone().into_iter().collect());
        environment.add_last(
            MapPropertySource::new(DEFAULT_PROPERTIES_SOURCE, flatten_document(defaults)).into_shared(),
        );
    }
    if !config.sources.profiles.is_empty() {
        environment.set_active_profiles(config.sources.profiles.clone());
    }

    let locator = FilePropertySourceLocator::new(
        config.sources.search_paths.clone(),
        config.sources.base_name.clone(),
    );
    let refresher = Arc::new(
        ContextRefresher::new(
            environment.clone(),
            Arc::new(RefreshScope::new()),
            ConfigBootstrap::new().with_locator(Arc::new(locator.clone())),
        )
        .with_metrics(metrics.clone()),
    );
    refresher.add_listener(Arc::new(|event: &EnvironmentChangeEvent| {
        if !event.keys.is_empty() {
            info!(source = %event.source, keys = ?event.keys, "Environment changed");
        }
        Ok(())
    }));

    let loaded = refresher
        .refresh_environment()
        .context("Initial configuration load failed")?;
    info!(properties = loaded.len(), "Application configuration loaded");

    let root = Container::builder("application")
        .environment(environment.clone())
        .refresh()
        .context("Failed to build the root container")?;

    let factory = Arc::new(
        NamedContextFactory::with_property(
            config.contexts.kind.clone(),
            config.context_default_unit(&catalog)?,
            config.contexts.kind.clone(),
            config.contexts.property_name.clone(),
        )
        .with_metrics(metrics.clone()),
    );
    factory.set_configurations(config.context_specifications(&catalog)?);
    factory.set_parent(Some(root.clone()));

    let shutdown_coordinator = ShutdownCoordinator::new(config.shutdown_timeout);

    let watcher = if config.watch.enabled {
        Some(ConfigWatcher::new(
            refresher.clone(),
            locator,
            config.watch.debounce,
        )?)
    } else {
        info!("File watching disabled");
        None
    };

    let management_handle = if config.management.enabled {
        if config.management.auth.api_key.as_deref() == Some("default-api-key-change-me") {
            warn!("Management API is using the default API key");
        }

        let server = ManagementServer::new(
            config.management.bind_addr,
            AppState::new(refresher.clone(), factory.clone(), metrics.clone()),
            config.management.auth.clone(),
        );
        let shutdown = shutdown_coordinator.signalled();
        Some(tokio::spawn(async move {
            if let Err(e) = server.start(shutdown).await {
                error!("Management API server error: {:#}", e);
            }
        }))
    } else {
        info!("Management API server disabled");
        None
    };

    let metrics_handle = match (config.monitoring.prometheus_enabled, config.monitoring.metrics_addr) {
        (true, Some(addr)) => {
            let server = MetricsServer::new(metrics.clone(), addr.to_string());
            Some(tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Metrics server error: {:#}", e);
                }
            }))
        }
        _ => None,
    };

    info!("ctxhub started, press Ctrl+C or send SIGTERM/SIGINT to shut down");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {:#}", e);
        shutdown_coordinator.trigger();
    }

    info!("Initiating graceful shutdown...");
    drop(watcher);

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    if let Some(handle) = management_handle {
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                error!("Management API task failed: {}", e);
            }
        }
    }

    if let Err(e) = shutdown_coordinator.shutdown_contexts(factory, root).await {
        error!("Context shutdown incomplete: {:#}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

fn log_summary(config: &Config) {
    info!("Configuration summary:");
    info!("  Search paths: {:?}", config.sources.search_paths);
    info!("  Base name: {}", config.sources.base_name);
    info!("  Profiles: {:?}", config.sources.profiles);
    info!(
        "  File watching: {}",
        if config.watch.enabled { "enabled" } else { "disabled" }
    );
    info!(
        "  Management API: {}",
        if config.management.enabled {
            config.management.bind_addr.to_string()
        } else {
            "disabled".to_string()
        }
    );
    info!("  Context specifications: {}", config.contexts.specifications.len());
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or("info")
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
