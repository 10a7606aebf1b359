//! # Queue Consumer
//!
//! Long-running consumer of the finalized sale queue.
//!
//! ## Consumer Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         QueueConsumer::start                            │
//! │                                                                         │
//! │   Disconnected ──► Connecting ──► Consuming ──────────┐                 │
//! │        ▲               │              │               │                 │
//! │        │               │ error        │ stream ends   │ delivery        │
//! │        │               ▼              ▼               ▼                 │
//! │        │            Backoff ◄─────────┘      SaleEventHandler::handle   │
//! │        │               │ constant delay               │                 │
//! │        │               └──► Connecting                ▼                 │
//! │        │                                       settle: ack / nack       │
//! │        │                                       (requeue) / dead-letter  │
//! │        └── shutdown (from any state)                                    │
//! │                                                                         │
//! │  • prefetch 1: one unacknowledged message at a time                     │
//! │  • a delivery in progress finishes before shutdown takes effect         │
//! │  • one consuming loop per QueueConsumer (AlreadyConsuming otherwise)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use backoff::backoff::{Backoff, Constant};
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::{SyncError, SyncResult};
use crate::handler::{settle, Acknowledger, DeadLetterSink, DeliveryInfo, SaleEventHandler, SaleProcessor};

/// Header set by quorum queues with the number of previous deliveries.
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of the consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Opening connection, channel and consumer.
    Connecting,
    /// Receiving deliveries.
    Consuming,
    /// Waiting before the next connection attempt.
    Backoff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Consuming => write!(f, "consuming"),
            ConnectionState::Backoff => write!(f, "backoff"),
        }
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// Consumes finalized sales and hands them to a [`SaleEventHandler`].
pub struct QueueConsumer<P> {
    config: BridgeConfig,
    handler: Arc<SaleEventHandler<P>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    is_consuming: Arc<AtomicBool>,
}

impl<P: SaleProcessor + 'static> QueueConsumer<P> {
    pub fn new(
        config: BridgeConfig,
        handler: SaleEventHandler<P>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        QueueConsumer {
            config,
            handler: Arc::new(handler),
            dead_letters,
            is_consuming: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true while a consuming loop started from this consumer runs.
    pub fn is_consuming(&self) -> bool {
        self.is_consuming.load(Ordering::SeqCst)
    }

    /// Starts the consuming loop in the background.
    ///
    /// Fails with [`SyncError::AlreadyConsuming`] if a loop is already
    /// running; the flag clears when that loop stops.
    pub fn start(&self) -> SyncResult<ConsumerHandle> {
        self.config.validate()?;

        if self.is_consuming.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyConsuming);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let worker = Worker {
            config: self.config.clone(),
            handler: self.handler.clone(),
            dead_letters: self.dead_letters.clone(),
            state: state.clone(),
            _running: RunningFlag(self.is_consuming.clone()),
        };

        info!(
            queue = %self.config.broker.queue,
            prefetch = self.config.broker.prefetch,
            "Queue consumer starting"
        );
        let task = tokio::spawn(worker.run(shutdown_rx));

        Ok(ConsumerHandle {
            state,
            shutdown_tx,
            task,
        })
    }
}

/// Handle to a running consumer loop.
#[derive(Debug)]
pub struct ConsumerHandle {
    state: Arc<RwLock<ConnectionState>>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Returns the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_consuming(&self) -> bool {
        self.state().await == ConnectionState::Consuming
    }

    /// Stops the loop and waits for it to finish.
    pub async fn shutdown(self) -> SyncResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("consumer task failed: {e}")))
    }
}

/// Clears the consuming flag when the loop ends, panics included.
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Consumer Loop
// =============================================================================

enum SessionEnd {
    Shutdown,
    Closed,
}

struct Session {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

struct Worker<P> {
    config: BridgeConfig,
    handler: Arc<SaleEventHandler<P>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    state: Arc<RwLock<ConnectionState>>,
    _running: RunningFlag,
}

impl<P: SaleProcessor> Worker<P> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Constant::new(self.config.reconnect_delay());

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting).await;

            match self.consume(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed) => warn!("Consumer stream closed by broker"),
                Err(e) => error!(?e, "Consumer connection failed"),
            }

            self.set_state(ConnectionState::Backoff).await;

            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| self.config.reconnect_delay());
            debug!(?delay, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown during backoff");
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        info!("Queue consumer stopped");
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Runs one broker session until it ends or shutdown is requested.
    async fn consume(&self, shutdown: &mut watch::Receiver<bool>) -> SyncResult<SessionEnd> {
        let Session {
            connection,
            channel,
            mut consumer,
        } = tokio::select! {
            session = self.open_session() => session?,
            _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
        };

        self.set_state(ConnectionState::Consuming).await;
        info!(queue = %self.config.broker.queue, "Consumer connected, processing messages");

        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown signal received, closing consumer");
                    break Ok(SessionEnd::Shutdown);
                }
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => self.process_delivery(delivery).await,
                    Some(Err(e)) => break Err(SyncError::from(e)),
                    None => break Ok(SessionEnd::Closed),
                },
            }
        };

        let _ = channel.close(200, "consumer stopping").await;
        let _ = connection.close(200, "consumer stopping").await;
        result
    }

    async fn open_session(&self) -> SyncResult<Session> {
        let broker = &self.config.broker;

        let connection = Connection::connect(&broker.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(broker.prefetch, BasicQosOptions::default())
            .await?;

        for queue in [&broker.queue, &broker.dead_letter_queue] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        let tag = format!("{}-{}", broker.consumer_tag, Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &broker.queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!(consumer_tag = %tag, "Consumer registered");
        Ok(Session {
            connection,
            channel,
            consumer,
        })
    }

    async fn process_delivery(&self, delivery: Delivery) {
        let info = DeliveryInfo {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            delivery_count: delivery_count(&delivery.properties),
        };

        debug!(
            delivery_tag = info.delivery_tag,
            redelivered = info.redelivered,
            delivery_count = ?info.delivery_count,
            bytes = delivery.data.len(),
            "Received sale message"
        );

        let outcome = self.handler.handle(&delivery.data, &info).await;
        let acker = DeliveryAcker(&delivery.acker);

        match settle(&outcome, &delivery.data, &acker, self.dead_letters.as_ref()).await {
            Ok(settlement) => {
                debug!(delivery_tag = info.delivery_tag, ?settlement, %outcome, "Delivery settled");
            }
            Err(e) => {
                // The broker redelivers unacknowledged messages once the channel drops.
                error!(?e, delivery_tag = info.delivery_tag, "Failed to settle delivery");
            }
        }
    }
}

// =============================================================================
// Broker Adapters
// =============================================================================

struct DeliveryAcker<'a>(&'a Acker);

#[async_trait]
impl Acknowledger for DeliveryAcker<'_> {
    async fn ack(&self) -> SyncResult<()> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn requeue(&self) -> SyncResult<()> {
        self.0
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

/// Reads the broker's delivery count header, if present.
pub fn delivery_count(properties: &BasicProperties) -> Option<u32> {
    let headers = properties.headers().as_ref()?;

    match headers.inner().get(DELIVERY_COUNT_HEADER)? {
        AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
        AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongUInt(n) => Some(*n),
        AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerConfig;
    use lapin::types::ShortString;
    use sgemp_core::{SaleOutcome, SaleRequest};
    use sgemp_db::{ServiceError, ServiceResult};
    use std::collections::BTreeMap;

    struct NeverCalled;

    #[async_trait]
    impl SaleProcessor for NeverCalled {
        async fn process(&self, _request: &SaleRequest) -> ServiceResult<SaleOutcome> {
            Err(ServiceError::Timeout(std::time::Duration::from_secs(1)))
        }
    }

    struct NullSink;

    #[async_trait]
    impl DeadLetterSink for NullSink {
        async fn dead_letter(&self, _payload: &[u8], _reason: &str) -> SyncResult<()> {
            Ok(())
        }
    }

    fn properties_with(value: AMQPValue) -> BasicProperties {
        let mut headers = BTreeMap::new();
        headers.insert(ShortString::from(DELIVERY_COUNT_HEADER), value);
        BasicProperties::default().with_headers(FieldTable::from(headers))
    }

    #[test]
    fn test_delivery_count_header() {
        assert_eq!(delivery_count(&properties_with(AMQPValue::LongLongInt(3))), Some(3));
        assert_eq!(delivery_count(&properties_with(AMQPValue::LongInt(1))), Some(1));
        assert_eq!(delivery_count(&properties_with(AMQPValue::LongLongInt(-1))), None);
        assert_eq!(
            delivery_count(&properties_with(AMQPValue::LongString("2".into()))),
            None
        );
        assert_eq!(delivery_count(&BasicProperties::default()), None);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Consuming.to_string(), "consuming");
        assert_eq!(ConnectionState::Backoff.to_string(), "backoff");
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut config = BridgeConfig::default();
        config.broker.url = "amqp://127.0.0.1:1/%2f".into();
        config.broker.reconnect_delay_secs = 1;

        let consumer = QueueConsumer::new(
            config,
            SaleEventHandler::new(NeverCalled, HandlerConfig::default()),
            Arc::new(NullSink),
        );

        let handle = consumer.start().unwrap();
        assert!(consumer.is_consuming());
        assert!(matches!(consumer.start(), Err(SyncError::AlreadyConsuming)));

        handle.shutdown().await.unwrap();
        assert!(!consumer.is_consuming());

        // The flag is released, so the consumer can start again.
        let handle = consumer.start().unwrap();
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_starting() {
        let mut config = BridgeConfig::default();
        config.broker.prefetch = 0;

        let consumer = QueueConsumer::new(
            config,
            SaleEventHandler::new(NeverCalled, HandlerConfig::default()),
            Arc::new(NullSink),
        );

        assert!(matches!(consumer.start(), Err(e) if e.is_config_error()));
        assert!(!consumer.is_consuming());
    }
}
