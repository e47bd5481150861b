//! HTTP server setup and lifecycle management
//!
//! The server owns the pipeline's lifecycle: workers are started before the
//! listener accepts traffic and stopped after the HTTP side has drained.

use crate::{routes, state::AppState};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// HTTP server instance
pub struct Server {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl Server {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Bind, serve until SIGINT/SIGTERM, then stop the pipeline
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let listener = TcpListener::bind(&addr)
            .await
            .context(format!("Failed to bind to {}", addr))?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let pipeline = self.state.pipeline.clone();

        if !pipeline.start() {
            warn!("Pipeline processor was already running");
        }

        info!("Server listening on http://{}", local_addr);
        info!("API documentation available at http://{}/api-docs/", local_addr);

        let app = routes::create_router(self.state.clone());

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error");

        info!("HTTP server drained, stopping pipeline processor");
        pipeline.stop().await;

        served?;
        info!("Server shutdown complete");
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

/// Resolve on SIGINT (Ctrl+C) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

/// Builder for creating a server with custom configuration
pub struct ServerBuilder {
    config: ServerConfig,
    state: Option<Arc<AppState>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            state: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn state(mut self, state: Arc<AppState>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<Server> {
        let state = self.state.context("Application state is required")?;

        Ok(Server::new(self.config, state))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltgate_authz::config::AuditSection;
    use voltgate_authz::{Pipeline, PipelineConfig};

    fn test_state() -> Arc<AppState> {
        let mut config = PipelineConfig::default();
        config.audit = AuditSection::Memory;
        Arc::new(AppState::new(Arc::new(Pipeline::from_config(config).unwrap())))
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_server_builder() {
        let server = ServerBuilder::new()
            .host("127.0.0.1")
            .port(9090)
            .state(test_state())
            .build()
            .unwrap();

        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 9090);
    }

    #[test]
    fn test_server_builder_missing_state() {
        let err = match ServerBuilder::new().build() {
            Ok(_) => panic!("building without state should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("state"));
    }

    #[tokio::test]
    async fn test_serve_starts_and_stops_pipeline() {
        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = Server::new(ServerConfig::default(), state.clone());
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));

        let started = async {
            while !state.pipeline.is_running() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), started)
            .await
            .unwrap();

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(!state.pipeline.is_running());
    }
}
