//! Management API Integration Tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use ctxhub::{
    context::{unit, NamedContextFactory},
    environment::{Environment, FilePropertySourceLocator},
    management::{types::ApiAuthConfig, types::BasicAuthConfig, AppState, ManagementServer},
    metrics::Metrics,
    refresh::{ConfigBootstrap, ContextRefresher, RefreshScope},
};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    dir: TempDir,
    router: Router,
}

fn harness(auth_config: ApiAuthConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("application.toml"), "greeting = \"hello\"\n").unwrap();

    let metrics = Arc::new(Metrics::new().unwrap());
    let refresher = Arc::new(
        ContextRefresher::new(
            Arc::new(Environment::new()),
            Arc::new(RefreshScope::new()),
            ConfigBootstrap::new().with_locator(Arc::new(FilePropertySourceLocator::new(
                vec![dir.path().to_path_buf()],
                "application",
            ))),
        )
        .with_metrics(metrics.clone()),
    );
    refresher.refresh_environment().unwrap();

    let factory = Arc::new(
        NamedContextFactory::new("client", unit("none", |_| Ok(()))).with_metrics(metrics.clone()),
    );

    let server = ManagementServer::new(
        "127.0.0.1:8080".parse().unwrap(),
        AppState::new(refresher, factory, metrics),
        auth_config,
    );

    Harness {
        dir,
        router: server.router(),
    }
}

fn open_auth() -> ApiAuthConfig {
    ApiAuthConfig {
        enabled: false,
        api_key: None,
        basic_auth: None,
    }
}

async fn send(router: &Router, method: &str, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_management_api_health_endpoint() {
    let harness = harness(open_auth());

    let response = send(&harness.router, "GET", "/api/v1/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["status"], json!("healthy"));
}

#[tokio::test]
async fn test_refresh_picks_up_file_change() {
    let harness = harness(open_auth());

    let body = json_body(send(&harness.router, "GET", "/api/v1/env/greeting").await).await;
    assert_eq!(body["data"]["value"], json!("hello"));
    let source = body["data"]["source"].as_str().unwrap().to_string();
    assert!(source.starts_with("config: ["));

    fs::write(
        harness.dir.path().join("application.toml"),
        "greeting = \"bonjour\"\nlocale = \"fr\"\n",
    )
    .unwrap();

    let body = json_body(send(&harness.router, "POST", "/api/v1/refresh").await).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["keys"], json!(["greeting", "locale"]));
    assert!(body["data"]["scope_generation"].is_u64());

    let body = json_body(send(&harness.router, "GET", "/api/v1/env/greeting").await).await;
    assert_eq!(body["data"]["value"], json!("bonjour"));

    let body = json_body(send(&harness.router, "GET", "/api/v1/env").await).await;
    let sources = body["data"]["property_sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["properties"]["locale"], json!("fr"));
}

#[tokio::test]
async fn test_failed_refresh_is_reported() {
    let harness = harness(open_auth());
    fs::write(harness.dir.path().join("application.toml"), "greeting = ").unwrap();

    let response = send(&harness.router, "POST", "/api/v1/env/refresh").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("refresh failed"));

    let body = json_body(send(&harness.router, "GET", "/api/v1/env/greeting").await).await;
    assert_eq!(body["data"]["value"], json!("hello"));
}

#[tokio::test]
async fn test_contexts_endpoints() {
    let harness = harness(open_auth());

    let body = json_body(send(&harness.router, "GET", "/api/v1/contexts/alpha").await).await;
    assert_eq!(body["success"], json!(false));

    let body = json_body(send(&harness.router, "POST", "/api/v1/contexts/alpha").await).await;
    assert_eq!(body["data"]["display_name"], json!("client-alpha"));

    let body = json_body(send(&harness.router, "GET", "/api/v1/contexts").await).await;
    assert_eq!(body["data"]["kind"], json!("client"));
    assert_eq!(body["data"]["contexts"][0]["name"], json!("alpha"));

    let response = send(&harness.router, "GET", "/api/v1/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("ctxhub_contexts_created_total 1"));
    assert!(text.contains("ctxhub_refresh_total"));
}

#[tokio::test]
async fn test_basic_auth_protects_refresh() {
    let harness = harness(ApiAuthConfig {
        enabled: true,
        api_key: None,
        basic_auth: Some(BasicAuthConfig {
            username: "ops".to_string(),
            password: "hunter2".to_string(),
        }),
    });

    let response = send(&harness.router, "POST", "/api/v1/refresh").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let credentials = general_purpose::STANDARD.encode("ops:hunter2");
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/refresh")
        .header("authorization", format!("Basic {}", credentials))
        .body(Body::empty())
        .unwrap();
    let response = harness.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Health stays public
    let response = send(&harness.router, "GET", "/api/v1/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}
