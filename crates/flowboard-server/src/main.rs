//! Flowboard relay server binary.

use flowboard_server::{AppState, Config, app};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowboard_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let storage = config.storage()?;
    match &config.data_dir {
        Some(dir) => info!("Persisting rooms to {}", dir.display()),
        None => info!("Rooms are kept in memory only"),
    }

    let state = Arc::new(AppState::new(storage));
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("Flowboard relay server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}
