//! # Sale Publisher
//!
//! Puts messages on a durable queue through the default exchange.
//!
//! ```text
//! publish(message)
//!     │
//!     ├── no open channel? ── connect, create channel, confirm_select
//!     ├── queue not declared on this channel? ── queue_declare(durable)
//!     ▼
//! basic_publish("", queue, persistent) ──► await publisher confirm
//!     │
//!     ├── ack  ──► Ok
//!     └── nack / error ──► drop channel (reconnect next call), Err
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::handler::DeadLetterSink;

const CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

// =============================================================================
// Message
// =============================================================================

/// A message bound for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub queue: String,
    pub payload: Vec<u8>,
    pub message_id: String,
    /// String headers (e.g. the dead-letter reason).
    pub headers: BTreeMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(queue: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        OutgoingMessage {
            queue: queue.into(),
            payload: payload.into(),
            message_id: Uuid::new_v4().to_string(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    fn properties(&self) -> BasicProperties {
        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE.into())
            .with_delivery_mode(PERSISTENT)
            .with_message_id(self.message_id.as_str().into());

        if self.headers.is_empty() {
            return properties;
        }

        let mut table = FieldTable::default();
        for (key, value) in &self.headers {
            table.insert(
                ShortString::from(key.as_str()),
                AMQPValue::LongString(value.as_str().into()),
            );
        }
        properties.with_headers(table)
    }
}

// =============================================================================
// Publisher Seam
// =============================================================================

/// Publishes messages. [`SalePublisher`] talks to the broker; tests use fakes.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: &OutgoingMessage) -> SyncResult<()>;
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for Arc<P> {
    async fn publish(&self, message: &OutgoingMessage) -> SyncResult<()> {
        (**self).publish(message).await
    }
}

// =============================================================================
// Lapin Publisher
// =============================================================================

struct OpenChannel {
    connection: Connection,
    channel: Channel,
    declared: HashSet<String>,
}

/// Publisher with publisher confirms and lazy reconnect.
pub struct SalePublisher {
    url: String,
    open: Mutex<Option<OpenChannel>>,
}

impl SalePublisher {
    /// Creates a publisher; the connection is opened on first publish.
    pub fn new(url: impl Into<String>) -> Self {
        SalePublisher {
            url: url.into(),
            open: Mutex::new(None),
        }
    }

    async fn connect(&self) -> SyncResult<OpenChannel> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        info!("Publisher connected to broker");
        Ok(OpenChannel {
            connection,
            channel,
            declared: HashSet::new(),
        })
    }

    async fn publish_on(open: &mut OpenChannel, message: &OutgoingMessage) -> SyncResult<()> {
        if !open.declared.contains(&message.queue) {
            open.channel
                .queue_declare(
                    &message.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            open.declared.insert(message.queue.clone());
        }

        let confirmation = open
            .channel
            .basic_publish(
                "",
                &message.queue,
                BasicPublishOptions::default(),
                &message.payload,
                message.properties(),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(SyncError::PublishFailed {
                queue: message.queue.clone(),
                reason: "broker did not confirm".into(),
            });
        }

        Ok(())
    }

    /// Closes the connection if one is open.
    pub async fn close(&self) {
        if let Some(open) = self.open.lock().await.take() {
            let _ = open.channel.close(200, "publisher closing").await;
            let _ = open.connection.close(200, "publisher closing").await;
        }
    }
}

#[async_trait]
impl EventPublisher for SalePublisher {
    async fn publish(&self, message: &OutgoingMessage) -> SyncResult<()> {
        let mut guard = self.open.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(open) = guard.as_mut() else {
            return Err(SyncError::Internal("publisher channel missing".into()));
        };

        match Self::publish_on(open, message).await {
            Ok(()) => {
                debug!(queue = %message.queue, message_id = %message.message_id, "Published message");
                Ok(())
            }
            Err(e) => {
                warn!(?e, queue = %message.queue, "Publish failed, dropping channel");
                *guard = None;
                Err(e)
            }
        }
    }
}

// =============================================================================
// Dead Letters
// =============================================================================

/// Sends rejected messages to the dead-letter queue with the reason attached.
pub struct DeadLetterPublisher<P> {
    publisher: P,
    queue: String,
}

impl<P: EventPublisher> DeadLetterPublisher<P> {
    pub fn new(publisher: P, queue: impl Into<String>) -> Self {
        DeadLetterPublisher {
            publisher,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl<P: EventPublisher> DeadLetterSink for DeadLetterPublisher<P> {
    async fn dead_letter(&self, payload: &[u8], reason: &str) -> SyncResult<()> {
        let message = OutgoingMessage::new(self.queue.clone(), payload)
            .with_header("x-dead-letter-reason", reason)
            .with_header("x-dead-lettered-at", chrono::Utc::now().to_rfc3339());

        self.publisher.publish(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: StdMutex<Vec<OutgoingMessage>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, message: &OutgoingMessage) -> SyncResult<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[test]
    fn test_message_properties() {
        let message = OutgoingMessage::new("finalized_sale", b"{}".to_vec())
            .with_header("x-dead-letter-reason", "bad json");
        let properties = message.properties();

        assert_eq!(*properties.delivery_mode(), Some(PERSISTENT));
        assert_eq!(
            properties.content_type().as_ref().map(|c| c.as_str()),
            Some(CONTENT_TYPE)
        );

        let headers = properties.headers().as_ref().unwrap();
        assert!(headers
            .inner()
            .iter()
            .any(|(k, _)| k.as_str() == "x-dead-letter-reason"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = OutgoingMessage::new("q", Vec::new());
        let b = OutgoingMessage::new("q", Vec::new());
        assert_ne!(a.message_id, b.message_id);
    }

    #[tokio::test]
    async fn test_dead_letter_carries_reason() {
        let recorder = Arc::new(RecordingPublisher::default());
        let dlq = DeadLetterPublisher::new(recorder.clone(), "finalized_sale.dead_letter");

        dlq.dead_letter(b"garbage", "undecodable payload").await.unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].queue, "finalized_sale.dead_letter");
        assert_eq!(sent[0].payload, b"garbage".to_vec());
        assert_eq!(
            sent[0].headers.get("x-dead-letter-reason").map(String::as_str),
            Some("undecodable payload")
        );
        assert!(sent[0].headers.contains_key("x-dead-lettered-at"));
    }
}
