//! Curation Server - HTTP host for the restaurant curation store.

use curation_server::config::Config;
use curation_server::{create_router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "curation_server=debug,curation_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Curation Server on {}:{}", config.host, config.port);
    match &config.data_dir {
        Some(dir) => tracing::info!("Persisting to {}", dir.display()),
        None => tracing::warn!("DATA_DIR not set; data is kept in memory only"),
    }

    // Open the database, running the schema upgrade if needed
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::open(config).await?;
    tracing::info!(
        "Opened database '{}' at schema version {}",
        state.integrity.database().name(),
        state.integrity.database().version()
    );

    // Start server
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
