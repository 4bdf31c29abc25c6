//! Management API Routes

use super::{
    auth::{auth_middleware, ApiAuth},
    handlers::*,
    types::ApiAuthConfig,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Management API router
pub struct ManagementApi;

impl ManagementApi {
    /// Create the management API router
    pub fn create_router(state: AppState, auth_config: ApiAuthConfig) -> Router {
        let auth = Arc::new(ApiAuth::new(auth_config));

        // Public routes (no authentication required)
        let public_routes = Router::new().route("/health", get(health_check));

        let protected_routes = Router::new()
            .route("/status", get(get_server_status))
            // Refresh
            .route("/refresh", post(refresh))
            .route("/env/refresh", post(refresh_environment))
            // Environment inspection
            .route("/env", get(get_environment))
            .route("/env/:key", get(get_property))
            // Named contexts
            .route("/contexts", get(list_contexts))
            .route("/contexts/:name", get(get_context).post(create_context))
            // Metrics
            .route("/metrics", get(export_metrics))
            .route("/stats", get(get_stats))
            .layer(middleware::from_fn_with_state(auth, auth_middleware));

        Router::new()
            .nest("/api/v1", public_routes.merge(protected_routes))
            .with_state(state)
            .layer(CorsLayer::permissive())
    }
}
