use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use intravert::config::Settings;
use intravert::server::router;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;

    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let engine = Arc::new(settings.engine()?);
    let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
    info!(bind = %settings.server.bind, timeout_ms = settings.engine.default_timeout_ms, "intravert listening");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}
