use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zeroq::api::{self, AppState};
use zeroq::config::Config;
use zeroq::platform::Platform;
use zeroq::provision::LocalProvisioner;
use zeroq::tenant::TenantResolver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    zeroq::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let resolver = TenantResolver::open(&config.database_url, config.compact_threshold)?;
    let provisioner = Arc::new(LocalProvisioner::new(&config.data_dir));
    let platform = Arc::new(Platform::new(resolver, provisioner));

    if config.api_key.is_none() {
        warn!("ZEROQ_API_KEY is not set: the API is open to anyone who can reach it");
    }
    let app = api::router(AppState::new(platform, config.api_key.clone()));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("zeroq listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  database: {}", config.database_url);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("zeroq stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
