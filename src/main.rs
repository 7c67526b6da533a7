use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use pissgraph::api::{create_router, ApiState};
use pissgraph::config::AppConfig;
use pissgraph::interfaces::reading_store::ReadingStore;
use pissgraph::observability::{metrics, tracing::init_tracing};
use pissgraph::storage::SqliteReadingStore;
use pissgraph::telemetry::lightstreamer::LightstreamerTransport;
use pissgraph::telemetry::TelemetryService;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let env = std::env::var("PISSGRAPH_ENV").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load(&env).context("failed to load configuration")?;

    // 2. Setup Logging & Metrics
    init_tracing(&config.logging);
    metrics::register_metrics();
    info!("Starting pISSgraph API server ({})", env);

    // 3. Open Store
    let sqlite = SqliteReadingStore::open(&config.storage.database_path)
        .with_context(|| format!("failed to open database {}", config.storage.database_path))?;
    info!("Using database at {}", sqlite.path());
    let store: Arc<dyn ReadingStore> = Arc::new(sqlite);

    // 4. Start Telemetry Polling
    let transport = Arc::new(LightstreamerTransport::new(&config.feed));
    let service = TelemetryService::from_config(store.clone(), transport, &config.feed, &config.polling);
    service.start().await.context("failed to start telemetry service")?;

    // 5. Serve HTTP
    let state = Arc::new(ApiState {
        store,
        connection: Some(service.connection().clone()),
        enable_seed: config.server.enable_seed_endpoint,
    });
    let app = create_router(state, &config.server.cors_origin_list());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(addr).await?;
    info!("API listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // 6. Shutdown
    info!("Shutting down...");
    service.stop().await;
    served?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
