//! Server orchestration: wiring, startup checks and graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use paddock::{RedisTelemetryStore, ReplayEngine, SessionCatalog, TelemetryStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::http;

/// Shared state handed to every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReplayEngine>,
    pub catalog: Arc<SessionCatalog>,
    /// Cancelled when the server is draining; connections send a final
    /// `ERROR(server shutting down)` and close.
    pub shutdown: CancellationToken,
}

/// Telemetry replay server application
pub struct ReplayServerApp {
    config: Config,
}

impl ReplayServerApp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until interrupted. In-memory replay state is lost at shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Sessions configured: {}", self.config.sessions.len());
        info!("Batch interval: {:?}", self.config.batch_interval);
        info!("Pre-fetch window: {:?}", self.config.buffer_duration);

        // Store unreachable at boot is fatal by design.
        let store =
            RedisTelemetryStore::connect(&self.config.redis_url, self.config.redis_pool_size)
                .await
                .with_context(|| format!("stream store unreachable at {}", self.config.redis_url))?;
        let store: Arc<dyn TelemetryStore> = Arc::new(store);

        let catalog = Arc::new(SessionCatalog::new(
            Arc::clone(&store),
            self.config.session_infos(),
        ));
        let engine = Arc::new(ReplayEngine::new(
            store,
            Arc::clone(&catalog),
            self.config.engine_config(),
        ));

        let shutdown = CancellationToken::new();
        engine.spawn_retention_sweeper(shutdown.clone());

        let state = AppState {
            engine: Arc::clone(&engine),
            catalog,
            shutdown: shutdown.clone(),
        };
        let router = http::router(state);

        let listener = tokio::net::TcpListener::bind(self.config.bind)
            .await
            .with_context(|| format!("failed to bind {}", self.config.bind))?;
        info!("Listening on {}", self.config.bind);

        let drain = shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received, draining clients");
                drain.cancel();
            })
            .await
            .context("server error")?;

        engine.shutdown().await;
        info!("Replay server shutdown complete");
        Ok(())
    }
}
