//! # Sgemp API
//!
//! Sale ingestion process: HTTP API plus the queue side of the configured role.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing (RUST_LOG)                                                 │
//! │  2. ApiConfig (env) + BridgeConfig (bridge.toml + env)                 │
//! │  3. Database (migrations)                                              │
//! │  4. SaleOrchestrator (role, deadline = processing_timeout)             │
//! │  5. back-office: QueueConsumer    pdv: OutboxRelay                     │
//! │  6. axum on HTTP_PORT until Ctrl+C / SIGTERM                           │
//! │  7. stop queue side, close pool                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sgemp_api::{router, ApiConfig, AppState};
use sgemp_db::{Database, DbConfig, SaleRole};
use sgemp_sync::{
    BridgeConfig, ConsumerHandle, DeadLetterPublisher, OutboxRelay, OutboxRelayHandle,
    QueueConsumer, SaleEventHandler, SalePublisher,
};

/// Background queue work owned by this process.
enum QueueSide {
    Consumer(ConsumerHandle),
    Relay(OutboxRelayHandle),
    Disabled,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Sgemp API...");

    // Load configuration
    let config = ApiConfig::load()?;
    let bridge = BridgeConfig::load(config.bridge_config_path.clone())
        .context("invalid bridge configuration")?;
    info!(
        port = config.http_port,
        role = ?config.role,
        queue = %bridge.broker.queue,
        queue_enabled = config.queue_enabled,
        "Configuration loaded"
    );

    // Open database
    let db = Database::new(DbConfig::new(config.database_path.clone()))
        .await
        .context("failed to open database")?;

    let orchestrator = db
        .orchestrator()
        .with_role(config.role)
        .with_deadline(bridge.processing_timeout());

    // Queue side
    let queue_side = if !config.queue_enabled {
        QueueSide::Disabled
    } else {
        match config.role {
            SaleRole::BackOffice => {
                let handler = SaleEventHandler::new(orchestrator.clone(), bridge.consumer.clone().into());
                let dead_letters = DeadLetterPublisher::new(
                    SalePublisher::new(bridge.broker.url.clone()),
                    bridge.broker.dead_letter_queue.clone(),
                );
                let consumer = QueueConsumer::new(bridge.clone(), handler, Arc::new(dead_letters));
                QueueSide::Consumer(consumer.start()?)
            }
            SaleRole::Pdv => {
                let relay = OutboxRelay::new(
                    db.clone(),
                    SalePublisher::new(bridge.broker.url.clone()),
                    bridge.broker.queue.clone(),
                    bridge.outbox.clone(),
                );
                QueueSide::Relay(relay.spawn())
            }
        }
    };

    // HTTP server
    let app = router(AppState::new(db.clone(), orchestrator));
    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(addr = %config.bind_address(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain queue side before closing the pool
    match queue_side {
        QueueSide::Consumer(handle) => handle.shutdown().await?,
        QueueSide::Relay(handle) => handle.shutdown().await?,
        QueueSide::Disabled => {}
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(?e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
