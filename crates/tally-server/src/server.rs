use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::router::{build_router, AppState};

/// Scrape and health endpoint for one replica.
pub struct TallyServer {
    config: ServerConfig,
    state: AppState,
}

impl TallyServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address. Split from [`Self::serve_on`] so callers
    /// learn about bind failures before anything else starts.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        Ok(TcpListener::bind(self.config.bind_addr).await?)
    }

    /// Serve until `shutdown` flips to `true`; in-flight requests finish.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> ServerResult<()> {
        let addr: SocketAddr = listener.local_addr()?;
        tracing::info!(%addr, "tally server listening");
        axum::serve(listener, build_router(self.state))
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;
        tracing::info!(%addr, "tally server stopped");
        Ok(())
    }

    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> ServerResult<()> {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }
}
