//! Management API Authentication

use super::types::ApiAuthConfig;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-api-key";

/// How a request was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Disabled,
    ApiKey,
    Basic,
}

/// Credential check for the protected routes
pub struct ApiAuth {
    config: ApiAuthConfig,
}

impl ApiAuth {
    pub fn new(config: ApiAuthConfig) -> Self {
        Self { config }
    }

    /// Check the request headers, returning the method that succeeded
    pub fn authenticate(&self, headers: &HeaderMap) -> Option<AuthMethod> {
        if !self.config.enabled {
            return Some(AuthMethod::Disabled);
        }

        if self.check_api_key(headers) {
            return Some(AuthMethod::ApiKey);
        }

        if self.check_basic(headers) {
            return Some(AuthMethod::Basic);
        }

        None
    }

    fn check_api_key(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.config.api_key else {
            return false;
        };

        headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|provided| provided == expected)
    }

    fn check_basic(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.config.basic_auth else {
            return false;
        };

        match basic_credentials(headers) {
            Some((username, password)) => {
                username == expected.username && password == expected.password
            }
            None => false,
        }
    }
}

/// Decode `Authorization: Basic <base64(user:password)>`
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (username, password) = credentials.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Authentication middleware function
pub async fn auth_middleware(
    State(auth): State<Arc<ApiAuth>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match auth.authenticate(request.headers()) {
        Some(method) => {
            debug!(?method, path = %request.uri().path(), "Management request authenticated");
            Ok(next.run(request).await)
        }
        None => {
            warn!(path = %request.uri().path(), "Management API authentication failed");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
