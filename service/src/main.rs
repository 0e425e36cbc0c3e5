//! Process entry point: configuration, wiring, bootstrap resurrection,
//! and graceful shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use whatsgate_gateway::{transport::dev::DevConnector, SessionRegistry};
use whatsgate_store::AuthStore;
use whatsgate_webhook::{Engine, JobQueue};

mod config;
mod routes;

use config::{Cli, ServiceConfig};
use routes::AppState;

/// How long shutdown may drain before the process force-exits.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::try_from(cli)?;

    run(config).await
}

async fn run(config: ServiceConfig) -> Result<()> {
    info!(
        listen = %config.listen,
        webhook_configured = config.sink.is_some(),
        "starting whatsgate",
    );

    if let Some(dir) = &config.auth_base_dir {
        tracing::debug!(
            dir,
            "AUTH_BASE_DIR is reserved; credentials are stored in the key-value service",
        );
    }

    let conn = whatsgate_store::connect(&config.redis_url)
        .await
        .context("connecting to the key-value service")?;

    let store = AuthStore::new(conn.clone());
    let queue = JobQueue::new(conn);
    let engine = Engine::new(queue, config.sink.clone());

    let worker = if engine.sink_configured() {
        Some(engine.start_worker().context("starting the webhook worker")?)
    } else {
        warn!("WEBHOOK_URL is empty, webhook delivery is disabled");

        None
    };

    // The dev connector is the integration point: a real protocol
    // implementation provides its own `Connector` here.
    let connector = Arc::new(DevConnector::new());

    let registry = SessionRegistry::new(
        config.supervisor.clone(),
        connector,
        store.clone(),
        Arc::new(engine.clone()),
        config.filter.clone(),
    );

    resurrect_sessions(&store, &registry).await;

    let state = Arc::new(AppState {
        registry: registry.clone(),
        engine: engine.clone(),
        qr_expiry_ms: config.supervisor.qr_expiry.as_millis() as u64,
    });

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;

    info!("listening on {}", config.listen);

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!("shutdown signal received, draining");

    engine.stop();

    let drain = async {
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        registry.shutdown_all().await;
    };

    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        tracing::error!(
            deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
            "drain did not finish in time, exiting",
        );

        std::process::exit(1);
    }

    info!("shutdown complete");

    Ok(())
}

/// Re-establish every session that left credentials behind. Individual
/// failures are logged and never abort the batch.
async fn resurrect_sessions(store: &AuthStore, registry: &SessionRegistry) {
    match store.discover_sessions().await {
        Ok(ids) if ids.is_empty() => info!("no persisted sessions to resurrect"),
        Ok(ids) => {
            info!(count = ids.len(), "resurrecting persisted sessions");

            for id in ids {
                if let Err(source) = registry.ensure(&id) {
                    warn!(session_id = %id, "resurrecting session failed: {source}");
                }
            }
        }
        Err(source) => warn!("discovering persisted sessions failed: {source}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(source) => {
                warn!("installing SIGTERM handler failed: {source}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
