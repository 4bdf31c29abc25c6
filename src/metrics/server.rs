//! Metrics HTTP Server
//!
//! Standalone endpoint for Prometheus scraping, used when the management API
//! is disabled or metrics should be exposed on a separate address.

use crate::metrics::Metrics;
use crate::Result;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// HTTP server for serving Prometheus metrics
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    bind_addr: String,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, bind_addr: String) -> Self {
        Self { metrics, bind_addr }
    }

    /// Bind and serve until the task is aborted
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!(bind_addr = %self.bind_addr, "Metrics server started");
        serve(listener, self.metrics.clone()).await
    }
}

/// Accept loop over an already bound listener
pub async fn serve(listener: TcpListener, metrics: Arc<Metrics>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((mut stream, addr)) => {
                debug!(client_addr = %addr, "Metrics request received");

                let metrics = metrics.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_request(&mut stream, metrics).await {
                        error!(error = %e, client_addr = %addr, "Failed to handle metrics request");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept metrics connection");
            }
        }
    }
}

async fn handle_request(stream: &mut TcpStream, metrics: Arc<Metrics>) -> Result<()> {
    let mut buffer = [0; 1024];
    let bytes_read = stream.read(&mut buffer).await?;

    if bytes_read == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);

    let (status, content_type, body) = if request.starts_with("GET /metrics") {
        (
            "200 OK",
            "text/plain; version=0.0.4; charset=utf-8",
            metrics.export_prometheus(),
        )
    } else if request.starts_with("GET /health") {
        ("200 OK", "text/plain", "OK".to_string())
    } else {
        ("404 Not Found", "text/plain", "Not Found".to_string())
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    debug!(status = %status, "Sent metrics response");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn request(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_metrics_endpoint() -> anyhow::Result<()> {
        let metrics = Arc::new(Metrics::new()?);
        metrics.record_context_created();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(serve(listener, metrics));

        let response = request(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("ctxhub_contexts_created_total 1"));

        let response = request(addr, "/nope").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        handle.abort();
        Ok(())
    }
}
