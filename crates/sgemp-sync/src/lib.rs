//! # sgemp-sync: Message Queue Bridge for Sgemp
//!
//! Carries finalized sales from the PDV to the back office over AMQP and
//! feeds them into the sale orchestrator.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Queue Bridge Architecture                       │
//! │                                                                         │
//! │  PDV                                                                   │
//! │  ┌────────────────┐     ┌────────────────┐                             │
//! │  │  OutboxRelay   │────►│ SalePublisher  │──┐                          │
//! │  │ sale_outbox →  │     │ confirms,      │  │                          │
//! │  │ queue, FIFO    │     │ lazy reconnect │  │                          │
//! │  └────────────────┘     └────────────────┘  │                          │
//! │                                             ▼                          │
//! │                                  ┌─────────────────────┐               │
//! │                                  │  finalized_sale     │ durable       │
//! │                                  └──────────┬──────────┘               │
//! │  Back office                                │                          │
//! │  ┌────────────────┐     ┌───────────────────▼──────┐                   │
//! │  │ QueueConsumer  │────►│   SaleEventHandler       │                   │
//! │  │ prefetch 1,    │     │ decode → validate →      │                   │
//! │  │ reconnect loop │     │ SaleOrchestrator         │                   │
//! │  └────────────────┘     └───────────┬──────────────┘                   │
//! │                                     │                                  │
//! │                  Processed ──► ack  │  Requeue ──► nack(requeue)       │
//! │                  DeadLetter ──► DeadLetterPublisher ──► *.dead_letter  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Broker, consumer and outbox settings (bridge.toml + env)
//! - [`consumer`] - Reconnecting queue consumer
//! - [`error`] - Bridge error types
//! - [`handler`] - Transport-neutral delivery handling and settlement
//! - [`outbox`] - PDV outbox relay
//! - [`publisher`] - Confirmed publisher and dead-letter sink
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sgemp_sync::{BridgeConfig, DeadLetterPublisher, QueueConsumer, SaleEventHandler, SalePublisher};
//!
//! let config = BridgeConfig::load_or_default(None);
//! let handler = SaleEventHandler::new(db.orchestrator(), config.consumer.clone().into());
//! let dead_letters = DeadLetterPublisher::new(
//!     SalePublisher::new(config.broker.url.clone()),
//!     config.broker.dead_letter_queue.clone(),
//! );
//!
//! let consumer = QueueConsumer::new(config, handler, Arc::new(dead_letters));
//! let handle = consumer.start()?;
//! // ...
//! handle.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod outbox;
pub mod publisher;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{BridgeConfig, BrokerSettings, ConsumerSettings, OutboxSettings, RedeliveryPolicy};
pub use consumer::{ConnectionState, ConsumerHandle, QueueConsumer};
pub use error::{SyncError, SyncResult};
pub use handler::{
    settle, Acknowledger, DeadLetterSink, DeliveryInfo, DeliveryOutcome, HandlerConfig,
    SaleEventHandler, SaleProcessor, Settlement,
};
pub use outbox::{OutboxRelay, OutboxRelayHandle, RelayReport};
pub use publisher::{DeadLetterPublisher, EventPublisher, OutgoingMessage, SalePublisher};
