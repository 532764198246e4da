//! Gateway Cache server binary
//!
//! Wires configuration, the cache store and the upstream client into the
//! router and serves it until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway_cache::cache::{CacheStore, InMemoryStore};
use gateway_cache::gateway::HttpUpstream;
use gateway_cache::{create_router, spawn_cleanup_task, AppState, Config};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache store (Redis when configured, in-process otherwise)
/// 4. Create the upstream client
/// 5. Create Axum router with the gateway pipeline
/// 6. Serve with peer addresses recorded for rate limiting
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gateway Cache");

    let config = Config::from_env();
    info!(
        "Configuration loaded: upstream={}, cache={}, ttl={}s, port={}",
        config.upstream_url, config.cache_name, config.cache_ttl, config.server_port
    );
    if config.users.is_empty() {
        warn!("GATEWAY_USERS is empty; every non-exempt request will be rejected");
    }

    let (store, cleanup_handle) = build_store(&config).await?;
    let upstream = HttpUpstream::from_config(&config).context("building upstream client")?;

    let state = AppState::from_config(&config, store, Arc::new(upstream));
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cleanup_handle))
    .await
    .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Picks the store backend. Only the in-process store needs a cleanup task.
async fn build_store(
    config: &Config,
) -> anyhow::Result<(Arc<dyn CacheStore>, Option<JoinHandle<()>>)> {
    #[cfg(feature = "redis-store")]
    if let Some(url) = &config.redis_url {
        let store = gateway_cache::cache::RedisStore::connect(url, config.cache_name.clone())
            .await
            .context("connecting to redis")?;
        info!("Using Redis cache store, namespace {}", config.cache_name);
        return Ok((Arc::new(store), None));
    }

    #[cfg(not(feature = "redis-store"))]
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but the redis-store feature is disabled; using in-memory store");
    }

    let store = InMemoryStore::from_config(config);
    let cleanup_handle = spawn_cleanup_task(store.clone(), config.cleanup_interval);
    info!(
        "In-memory cache store initialized: max_entries={}, cleanup_interval={}s",
        config.max_entries, config.cleanup_interval
    );
    Ok((Arc::new(store), Some(cleanup_handle)))
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts the cleanup task.
async fn shutdown_signal(cleanup_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = cleanup_handle {
        handle.abort();
        warn!("Cleanup task aborted");
    }
}
