//! # Outbox Relay
//!
//! Publishes the PDV's `sale_outbox` entries to the finalized sale queue.
//!
//! ## Relay Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Outbox Relay Flow                               │
//! │                                                                         │
//! │  every poll_interval_secs:                                             │
//! │                                                                         │
//! │  1. Poll: SELECT ... FROM sale_outbox                                  │
//! │           WHERE published_at IS NULL AND attempts < max_attempts       │
//! │           ORDER BY created_at LIMIT batch_size                         │
//! │                                                                         │
//! │  2. For each entry, oldest first:                                      │
//! │     publish(finalized_sale, payload)                                   │
//! │       ├── confirmed ──► published_at = now                             │
//! │       └── failed    ──► attempts += 1, last_error; stop this round     │
//! │                                                                         │
//! │  3. Entries at max_attempts are left in place and reported as stuck.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sgemp_db::Database;

use crate::config::OutboxSettings;
use crate::error::{SyncError, SyncResult};
use crate::publisher::{EventPublisher, OutgoingMessage};

/// Result of one relay round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

/// Moves outbox entries onto the queue.
pub struct OutboxRelay<P> {
    db: Database,
    publisher: P,
    queue: String,
    settings: OutboxSettings,
}

impl<P: EventPublisher + 'static> OutboxRelay<P> {
    pub fn new(db: Database, publisher: P, queue: impl Into<String>, settings: OutboxSettings) -> Self {
        OutboxRelay {
            db,
            publisher,
            queue: queue.into(),
            settings,
        }
    }

    /// Publishes one batch of pending entries.
    pub async fn run_once(&self) -> SyncResult<RelayReport> {
        let outbox = self.db.sale_outbox();
        let entries = outbox
            .get_pending(self.settings.batch_size, self.settings.max_attempts)
            .await?;

        let mut report = RelayReport::default();

        if entries.is_empty() {
            debug!("No pending outbox entries");
        }

        for entry in entries {
            let mut message = OutgoingMessage::new(self.queue.clone(), entry.payload.into_bytes());
            message.message_id = format!("sale-{}", entry.sale_id);

            match self.publisher.publish(&message).await {
                Ok(()) => {
                    outbox.mark_published(entry.id).await?;
                    report.published += 1;
                    debug!(outbox_id = entry.id, sale_id = entry.sale_id, "Sale published");
                }
                Err(e) => {
                    outbox.mark_failed(entry.id, &e.to_string()).await?;
                    report.failed += 1;
                    warn!(
                        outbox_id = entry.id,
                        sale_id = entry.sale_id,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "Failed to publish sale"
                    );
                    break;
                }
            }
        }

        let stuck = outbox.count_stuck(self.settings.max_attempts).await?;
        if stuck > 0 {
            warn!(
                stuck,
                max_attempts = self.settings.max_attempts,
                "Outbox entries exceeded max publish attempts"
            );
        }

        if report.published > 0 {
            info!(published = report.published, "Outbox relay round complete");
        }

        Ok(report)
    }

    /// Runs the relay on an interval until shut down.
    pub fn spawn(self) -> OutboxRelayHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(queue = %self.queue, "Outbox relay starting");

            // interval() panics on a zero period
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                self.settings.poll_interval_secs.max(1),
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(?e, "Outbox relay round failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Outbox relay shutting down");
                        break;
                    }
                }
            }
        });

        OutboxRelayHandle { shutdown_tx, task }
    }
}

/// Handle to a running relay.
pub struct OutboxRelayHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl OutboxRelayHandle {
    /// Stops the relay and waits for the current round to finish.
    pub async fn shutdown(self) -> SyncResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("outbox relay task failed: {e}")))
    }
}
