use anyhow::Result;
use jobs_core::QueryClient;
use jobs_query::{create_router, influx::InfluxClient, AppState, QueryConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Arc::new(QueryConfig::load()?);
    config.validate()?;
    info!("Loaded configuration: {:?}", config);

    // Initialize the store client
    let client: Arc<dyn QueryClient> = Arc::new(InfluxClient::new(&config.influx)?);
    info!(url = %config.influx.url, org = %config.influx.org, "Initialized InfluxDB client");

    let state = AppState::new(client, config.clone());
    let app = create_router(state);

    // Start server
    let listener = TcpListener::bind(&config.bind_address).await?;
    let addr = listener.local_addr()?;
    info!("Jobs Query Service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Jobs Query Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
