//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router from the route table
//! - Apply the request timeout layer
//! - Serve on a listener until the shutdown signal fires, then drain

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;

use crate::api::{build_router, Dependencies, Registries, RouteError};
use crate::config::ServerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to build routes: {0}")]
    Routes(#[from] RouteError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the intake endpoints.
pub struct HttpServer {
    router: Router,
    registries: Registries,
}

impl HttpServer {
    /// Create a server with the routes for `config`.
    pub fn new(config: &ServerConfig, deps: Dependencies) -> Result<Self, ServerError> {
        let registries = Registries::new();
        let router = Self::build_router(config, deps, &registries)?;
        Ok(Self { router, registries })
    }

    #[allow(deprecated)]
    fn build_router(
        config: &ServerConfig,
        deps: Dependencies,
        registries: &Registries,
    ) -> Result<Router, ServerError> {
        let router = build_router(config, deps, registries)?
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));
        Ok(router)
    }

    /// Counter registries backing the monitoring middleware.
    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Serve on `listener` until `shutdown` fires, then finish in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
