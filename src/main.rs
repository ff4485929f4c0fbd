use callrelay::application::session::{CallRegistry, CallSessionManager};
use callrelay::config::Config;
use callrelay::infrastructure::persistence::{create_sink, PersistenceWriter};
use callrelay::infrastructure::protocols::realtime::TungsteniteConnector;
use callrelay::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting CallRelay");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;
    info!(
        bind = %config.bind_address(),
        model = %config.realtime.model,
        audio_format = config.realtime.audio_format.as_str(),
        persistence = ?config.persistence.backend,
        "Configuration loaded"
    );
    let config = Arc::new(config);

    let prometheus_handle = init_metrics()?;

    let sink = create_sink(&config.persistence).await?;
    let writer = PersistenceWriter::spawn(sink, &config.persistence);

    let registry = CallRegistry::new();
    let sessions = CallSessionManager::new(
        config.clone(),
        registry.clone(),
        writer.handle(),
        Arc::new(TungsteniteConnector),
    );

    let app = build_router(AppState::new(sessions), prometheus_handle);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    let shutdown_registry = registry.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            shutdown_registry.shutdown_all().await;
        })
        .await;

    if let Err(e) = served {
        error!("HTTP server error: {}", e);
    }

    // Sessions finalize their records before the writer stops
    let grace = config.session.grace_period() * 2;
    let deadline = tokio::time::Instant::now() + grace;
    while !registry.is_empty().await && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    writer.shutdown().await;

    info!("CallRelay stopped");
    Ok(())
}
