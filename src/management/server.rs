//! Management API Server

use super::{api::ManagementApi, handlers::AppState, types::ApiAuthConfig};
use crate::Result;
use anyhow::Context;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Management API server
pub struct ManagementServer {
    bind_addr: SocketAddr,
    app_state: AppState,
    auth_config: ApiAuthConfig,
}

impl ManagementServer {
    pub fn new(bind_addr: SocketAddr, app_state: AppState, auth_config: ApiAuthConfig) -> Self {
        Self {
            bind_addr,
            app_state,
            auth_config,
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn start(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        info!("Starting management API server on {}", self.bind_addr);

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind management API server to {}", self.bind_addr))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let local_addr = listener.local_addr().context("Management listener has no address")?;
        let app = self.router();
        info!("Management API server listening on {}", local_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Management API server error")?;

        info!("Management API server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        ManagementApi::create_router(self.app_state.clone(), self.auth_config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{unit, NamedContextFactory};
    use crate::environment::Environment;
    use crate::metrics::Metrics;
    use crate::refresh::{ConfigBootstrap, ContextRefresher, RefreshScope};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_serves_health_until_shutdown() {
        let refresher = Arc::new(ContextRefresher::new(
            Arc::new(Environment::new()),
            Arc::new(RefreshScope::new()),
            ConfigBootstrap::new(),
        ));
        let factory = Arc::new(NamedContextFactory::new("client", unit("none", |_| Ok(()))));
        let state = AppState::new(refresher, factory, Arc::new(Metrics::new().unwrap()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ManagementServer::new(addr, state, ApiAuthConfig::default());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/v1/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
