use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use replay_server::{Config, ReplayServerApp};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Set log level by RUST_LOG if set or fall back to the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();

    info!("Telemetry Replay Server v{}", env!("CARGO_PKG_VERSION"));

    ReplayServerApp::new(config).run().await
}
