//! `orgsecrets` server entry point.
//!
//! Connects the registry and the value store, then starts the Axum HTTP
//! server with graceful shutdown. A background maintenance worker runs
//! alongside the server and is cancelled on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use orgsecrets_server::config::{ServerConfig, ValueStoreBackend};
use orgsecrets_server::maintenance;
use orgsecrets_server::repository::PgRegistry;
use orgsecrets_server::routes::build_router;
use orgsecrets_server::state::{AppState, Registries};
use orgsecrets_storage::{MemoryStore, ValueStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(value_store = ?config.value_store, "orgsecrets starting");

    let registries = connect_registries(&config).await?;
    let values = open_value_store(&config)?;
    let state = Arc::new(AppState::new(&config, registries, values));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let maintenance_handle = {
        let state = Arc::clone(&state);
        let interval = Duration::from_secs(config.maintenance_interval_secs.max(1));
        let repair = config.reconcile_repair;
        tokio::spawn(maintenance::worker(state, interval, repair, shutdown_rx))
    };

    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "orgsecrets server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), maintenance_handle).await;

    info!("orgsecrets server stopped");
    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set, in-memory otherwise.
async fn connect_registries(config: &ServerConfig) -> anyhow::Result<Registries> {
    let Some(url) = &config.database_url else {
        warn!("DATABASE_URL not set, using in-memory registries (data will not persist)");
        return Ok(Registries::in_memory(config.free_tier_limit));
    };

    info!(url = %"[redacted]", "connecting to PostgreSQL registry");
    let registry = PgRegistry::connect(
        url,
        config.database_max_connections,
        config.request_timeout,
        config.free_tier_limit,
    )
    .await
    .context("failed to connect to PostgreSQL registry")?;

    Ok(registry.into_registries())
}

fn open_value_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn ValueStore>> {
    let store: Arc<dyn ValueStore> = match &config.value_store {
        ValueStoreBackend::Memory => {
            info!("using in-memory value store (values will not persist)");
            Arc::new(MemoryStore::new())
        }
        #[cfg(feature = "rocksdb-backend")]
        ValueStoreBackend::RocksDb { path } => {
            info!(path = %path, "using RocksDB value store");
            Arc::new(
                orgsecrets_storage::RocksDbStore::open(path)
                    .context("failed to open RocksDB value store")?,
            )
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        ValueStoreBackend::RocksDb { .. } => {
            anyhow::bail!("RocksDB value store requested but feature 'rocksdb-backend' is not enabled");
        }
        #[cfg(feature = "vault-backend")]
        ValueStoreBackend::Vault {
            address,
            token,
            mount,
            namespace,
        } => {
            info!(address = %address, mount = %mount, "using Vault KV v2 value store");
            Arc::new(
                orgsecrets_storage::VaultKvStore::new(orgsecrets_storage::VaultKvConfig {
                    address: address.clone(),
                    token: token.clone(),
                    mount: mount.clone(),
                    namespace: namespace.clone(),
                    request_timeout: config.request_timeout,
                })
                .context("failed to build Vault client")?,
            )
        }
        #[cfg(not(feature = "vault-backend"))]
        ValueStoreBackend::Vault { .. } => {
            anyhow::bail!("Vault value store requested but feature 'vault-backend' is not enabled");
        }
    };
    Ok(store)
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
