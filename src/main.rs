use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use askdb_backend::api;
use askdb_backend::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so the log level can come from it
    let config = Config::from_env();
    let (level, ansi) = match &config {
        Ok(config) => (config.logging.level.clone(), config.logging.style != "never"),
        Err(_) => ("info".to_string(), true),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(ansi)
        .init();

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting server on {}", config.server_address());

    let state = api::routes::build_state(&config).await.map_err(|e| {
        error!("Failed to initialize application state: {:#}", e);
        e
    })?;
    let app = api::routes::create_router(state);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
