use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_cluster::{api, cache::Cache, cluster::Cluster, config::Config, AppState};

/// How often expired cache entries are swept.
const EVICTION_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "file-cluster starting");

    // Load configuration
    let config = Config::load()?;

    // Build the storage nodes
    let cluster = Cluster::from_config(&config)?;
    let kinds: Vec<&str> = cluster
        .configured_kinds()
        .iter()
        .map(|k| k.as_str())
        .collect();
    info!(
        nodes = cluster.backends().len(),
        backends = ?kinds,
        dir = %cluster.dir(),
        "Cluster configured"
    );

    // Open the response cache
    let cache = Cache::open(&config.data_dir)?;
    info!("Cache opened at: {}", config.data_dir);

    let eviction = config
        .cache_enabled()
        .then(|| spawn_eviction(cache.clone()));

    let state = Arc::new(AppState {
        config: config.clone(),
        cluster,
        cache,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on: {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: abort background tasks
    if let Some(handle) = eviction {
        info!("Shutting down background tasks");
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Periodically drop cache entries whose TTL has run out.
fn spawn_eviction(cache: Cache) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            interval.tick().await;
            let cache = cache.clone();
            let result =
                tokio::task::spawn_blocking(move || cache.evict_expired(chrono::Utc::now())).await;
            match result {
                Ok(Ok(0)) => {}
                Ok(Ok(evicted)) => info!(evicted, "Evicted expired cache entries"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Cache eviction failed"),
                Err(e) => tracing::error!(error = %e, "Cache eviction task panicked"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
