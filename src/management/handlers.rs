//! Management API Handlers

use super::types::*;
use crate::context::{ContextInfo, NamedContextFactory};
use crate::environment::{Environment, PropertySource};
use crate::metrics::{Metrics, MetricsSummary};
use crate::refresh::ContextRefresher;
use crate::Result;
use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{error, info};

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub refresher: Arc<ContextRefresher>,
    pub factory: Arc<NamedContextFactory>,
    pub metrics: Arc<Metrics>,
    pub start_time: SystemTime,
}

impl AppState {
    pub fn new(
        refresher: Arc<ContextRefresher>,
        factory: Arc<NamedContextFactory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            refresher,
            factory,
            metrics,
            start_time: SystemTime::now(),
        }
    }

    fn environment(&self) -> &Arc<Environment> {
        self.refresher.environment()
    }
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let mut checks = HashMap::new();

    let started = Instant::now();
    let layers = state.environment().property_sources().len();
    checks.insert(
        "environment".to_string(),
        CheckResult {
            status: "healthy".to_string(),
            message: Some(format!("{} property sources", layers)),
            duration_ms: started.elapsed().as_millis() as u64,
        },
    );

    let summary = state.metrics.summary();
    let refresh_status = if summary.refresh_failures > 0 && summary.refreshes == 0 {
        "warning"
    } else {
        "healthy"
    };
    checks.insert(
        "refresh".to_string(),
        CheckResult {
            status: refresh_status.to_string(),
            message: Some(format!(
                "{} refreshes, {} failures",
                summary.refreshes, summary.refresh_failures
            )),
            duration_ms: 0,
        },
    );

    let overall_status = if checks.values().all(|c| c.status == "healthy") {
        "healthy"
    } else {
        "degraded"
    };

    Json(ApiResponse::success(HealthStatus {
        status: overall_status.to_string(),
        checks,
        timestamp: SystemTime::now(),
    }))
}

/// Get daemon status
pub async fn get_server_status(State(state): State<AppState>) -> Json<ApiResponse<ServerStatus>> {
    let uptime = SystemTime::now()
        .duration_since(state.start_time)
        .unwrap_or_default()
        .as_secs();

    let environment = state.environment();
    let status = ServerStatus {
        uptime_seconds: uptime,
        version: env!("CARGO_PKG_VERSION").to_string(),
        refresher_id: state.refresher.id().to_string(),
        active_profiles: environment.effective_profiles(),
        property_sources: environment.property_sources().len(),
        contexts: state.factory.context_names().len(),
        scope_generation: state.refresher.scope().generation(),
    };

    Json(ApiResponse::success(status))
}

/// Full refresh: reload the environment and invalidate the refresh scope
pub async fn refresh(State(state): State<AppState>) -> Json<ApiResponse<RefreshResult>> {
    info!("Refresh requested via management API");
    let refresher = state.refresher.clone();
    match run_blocking(move || refresher.refresh()).await {
        Ok(keys) => Json(ApiResponse::success(RefreshResult {
            keys,
            scope_generation: Some(state.refresher.scope().generation()),
        })),
        Err(e) => refresh_failed(e),
    }
}

/// Environment-only refresh; scoped instances are kept
pub async fn refresh_environment(State(state): State<AppState>) -> Json<ApiResponse<RefreshResult>> {
    info!("Environment refresh requested via management API");
    let refresher = state.refresher.clone();
    match run_blocking(move || refresher.refresh_environment()).await {
        Ok(keys) => Json(ApiResponse::success(RefreshResult {
            keys,
            scope_generation: None,
        })),
        Err(e) => refresh_failed(e),
    }
}

fn refresh_failed(e: anyhow::Error) -> Json<ApiResponse<RefreshResult>> {
    error!("Refresh via management API failed: {:#}", e);
    Json(ApiResponse::error(format!("{:#}", e)))
}

/// Layers of the live environment
pub async fn get_environment(State(state): State<AppState>) -> Json<ApiResponse<EnvironmentView>> {
    let environment = state.environment();
    let property_sources = environment
        .property_sources()
        .iter()
        .map(|source| PropertySourceView {
            name: source.name().to_string(),
            properties: source_properties(source.as_ref()),
        })
        .collect();

    Json(ApiResponse::success(EnvironmentView {
        active_profiles: environment.active_profiles(),
        default_profiles: environment.default_profiles(),
        property_sources,
    }))
}

/// Resolve a single key and report which layer supplied it
pub async fn get_property(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<ApiResponse<PropertyView>> {
    match locate_property(state.environment(), &key) {
        Some((source, value)) => Json(ApiResponse::success(PropertyView { key, value, source })),
        None => Json(ApiResponse::error(format!("Property not found: {}", key))),
    }
}

/// Existing named contexts
pub async fn list_contexts(State(state): State<AppState>) -> Json<ApiResponse<ContextsSummary>> {
    Json(ApiResponse::success(ContextsSummary {
        kind: state.factory.kind().to_string(),
        specifications: state.factory.specification_names(),
        contexts: state.factory.describe_all(),
    }))
}

/// Describe one context without creating it
pub async fn get_context(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<ApiResponse<ContextInfo>> {
    match state.factory.describe(&name) {
        Some(info) => Json(ApiResponse::success(info)),
        None => Json(ApiResponse::error(format!("Context not found: {}", name))),
    }
}

/// Get or create a named context
pub async fn create_context(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<ApiResponse<ContextInfo>> {
    let factory = state.factory.clone();
    let context_name = name.clone();
    let result = run_blocking(move || {
        factory
            .get_context(&context_name)
            .map(|container| ContextInfo::from(container.as_ref()))
    })
    .await;

    match result {
        Ok(info) => Json(ApiResponse::success(info)),
        Err(e) => {
            error!(context = %name, "Context creation via management API failed: {:#}", e);
            Json(ApiResponse::error(format!("{:#}", e)))
        }
    }
}

/// Metrics in Prometheus text format
pub async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
}

/// Metric counters as JSON
pub async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<MetricsSummary>> {
    Json(ApiResponse::success(state.metrics.summary()))
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("Blocking management task failed to complete")?
}

fn source_properties(source: &dyn PropertySource) -> Option<BTreeMap<String, serde_json::Value>> {
    let names = match source.property_names()? {
        Ok(names) => names,
        Err(e) => {
            error!(source = %source.name(), "Failed to list properties: {:#}", e);
            return None;
        }
    };

    Some(
        names
            .into_iter()
            .filter_map(|name| source.get_property(&name).map(|value| (name, value)))
            .collect(),
    )
}

fn locate_property(environment: &Environment, key: &str) -> Option<(String, serde_json::Value)> {
    let found = environment.property_sources().iter().find_map(|source| {
        source
            .get_property(key)
            .map(|value| (source.name().to_string(), value))
    });

    found.or_else(|| {
        environment
            .parent()
            .and_then(|parent| locate_property(parent, key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::unit;
    use crate::environment::MapPropertySource;
    use crate::refresh::{ConfigBootstrap, RefreshScope};
    use serde_json::json;

    fn create_test_state() -> AppState {
        let environment = Arc::new(Environment::new());
        environment.add_first(
            MapPropertySource::from_pairs("overrides", [("server.port", json!(9000))]).into_shared(),
        );
        let refresher = Arc::new(ContextRefresher::new(
            environment,
            Arc::new(RefreshScope::new()),
            ConfigBootstrap::new(),
        ));
        let factory = Arc::new(NamedContextFactory::new("client", unit("none", |_| Ok(()))));
        AppState::new(refresher, factory, Arc::new(Metrics::new().unwrap()))
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check(State(create_test_state())).await;
        assert!(response.0.success);
        assert_eq!(response.0.data.unwrap().status, "healthy");
    }

    #[tokio::test]
    async fn test_get_property_reports_source() {
        let state = create_test_state();
        let response = get_property(State(state.clone()), Path("server.port".to_string())).await;
        let view = response.0.data.unwrap();
        assert_eq!(view.value, json!(9000));
        assert_eq!(view.source, "overrides");

        let response = get_property(State(state), Path("absent".to_string())).await;
        assert!(!response.0.success);
    }

    #[tokio::test]
    async fn test_create_then_describe_context() {
        let state = create_test_state();
        let response = get_context(State(state.clone()), Path("alpha".to_string())).await;
        assert!(!response.0.success);

        let response = create_context(State(state.clone()), Path("alpha".to_string())).await;
        assert_eq!(response.0.data.unwrap().name, "alpha");

        let response = get_context(State(state), Path("alpha".to_string())).await;
        assert!(response.0.success);
    }

    #[tokio::test]
    async fn test_refresh_environment_keeps_scope() {
        let state = create_test_state();
        let generation = state.refresher.scope().generation();

        let response = refresh_environment(State(state.clone())).await;
        let result = response.0.data.unwrap();
        assert!(result.keys.is_empty());
        assert!(result.scope_generation.is_none());
        assert_eq!(state.refresher.scope().generation(), generation);

        let response = refresh(State(state.clone())).await;
        assert!(response.0.data.unwrap().scope_generation.is_some());
        assert!(state.refresher.scope().generation() > generation);
    }
}
