//! # Sale Event Handler
//!
//! Decides what happens to one delivery of the finalized-sale queue,
//! independent of the broker client.
//!
//! ## Decision Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  payload                                                                │
//! │     │                                                                   │
//! │     ├── not JSON / wrong shape ──────────────────────► DeadLetter       │
//! │     │                                                                   │
//! │     ├── redelivered + AcknowledgeWithoutProcessing ──► Processed        │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  SaleProcessor::process (the orchestrator)                              │
//! │     │                                                                   │
//! │     ├── Created / AlreadyProcessed ──────────────────► Processed        │
//! │     │                                                                   │
//! │     └── any error / timeout                                             │
//! │            │                                                            │
//! │            ├── attempts < max_deliveries ────────────► Requeue          │
//! │            └── attempts ≥ max_deliveries ────────────► DeadLetter       │
//! │                                                                         │
//! │  attempts = max(x-delivery-count + 1, local failure count)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`settle`] turns the outcome into broker calls:
//! Processed → ack, Requeue → nack(requeue), DeadLetter → publish to the
//! dead-letter queue then ack (nack(requeue) if that publish fails).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ConsumerSettings, RedeliveryPolicy};
use crate::error::SyncResult;
use sgemp_core::validation::validate_sale_request;
use sgemp_core::{SaleOutcome, SaleRequest};
use sgemp_db::{SaleOrchestrator, ServiceResult};

// =============================================================================
// Delivery Types
// =============================================================================

/// Broker metadata of one delivery.
#[derive(Debug, Clone, Default)]
pub struct DeliveryInfo {
    pub delivery_tag: u64,
    /// Broker flag: this message was delivered before.
    pub redelivered: bool,
    /// Previous deliveries reported by the broker (`x-delivery-count`),
    /// when the queue type provides it.
    pub delivery_count: Option<u32>,
}

/// What to do with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Ack; the sale is stored (now or earlier).
    Processed,
    /// Nack with requeue; try again later.
    Requeue,
    /// Move to the dead-letter queue.
    DeadLetter { reason: String },
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Processed => write!(f, "processed"),
            DeliveryOutcome::Requeue => write!(f, "requeue"),
            DeliveryOutcome::DeadLetter { reason } => write!(f, "dead-letter ({reason})"),
        }
    }
}

// =============================================================================
// Processor Seam
// =============================================================================

/// Stores one sale. Implemented by the orchestrator; tests use fakes.
#[async_trait]
pub trait SaleProcessor: Send + Sync {
    async fn process(&self, request: &SaleRequest) -> ServiceResult<SaleOutcome>;
}

#[async_trait]
impl SaleProcessor for SaleOrchestrator {
    async fn process(&self, request: &SaleRequest) -> ServiceResult<SaleOutcome> {
        self.create_sale(request).await
    }
}

// =============================================================================
// Handler
// =============================================================================

/// Handler settings.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub max_deliveries: u32,
    pub redelivery_policy: RedeliveryPolicy,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        ConsumerSettings::default().into()
    }
}

impl From<ConsumerSettings> for HandlerConfig {
    fn from(settings: ConsumerSettings) -> Self {
        HandlerConfig {
            max_deliveries: settings.max_deliveries,
            redelivery_policy: settings.redelivery_policy,
        }
    }
}

/// Failure entries untouched for this long are dropped.
const FAILURE_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on tracked messages; the stalest entry is evicted first.
const MAX_TRACKED_FAILURES: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct FailureEntry {
    attempts: u32,
    last_seen: Instant,
}

/// Failed attempts per message, for brokers without `x-delivery-count`.
///
/// A redelivery may land on another consumer, so entries expire instead of
/// waiting for a success or dead letter that never comes here.
#[derive(Debug)]
struct FailureTracker {
    entries: HashMap<String, FailureEntry>,
    ttl: Duration,
    capacity: usize,
}

impl FailureTracker {
    fn new(ttl: Duration, capacity: usize) -> Self {
        FailureTracker {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Counts a failure and returns the local attempt number.
    fn record(&mut self, key: &str, now: Instant) -> u32 {
        self.prune(now);

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            let stalest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(k, _)| k.clone());
            if let Some(stalest) = stalest {
                self.entries.remove(&stalest);
            }
        }

        let entry = self.entries.entry(key.to_string()).or_insert(FailureEntry {
            attempts: 0,
            last_seen: now,
        });
        entry.attempts += 1;
        entry.last_seen = now;
        entry.attempts
    }

    fn clear(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) < ttl);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Maps deliveries to outcomes.
pub struct SaleEventHandler<P> {
    processor: P,
    config: HandlerConfig,
    failures: Mutex<FailureTracker>,
}

impl<P: SaleProcessor> SaleEventHandler<P> {
    pub fn new(processor: P, config: HandlerConfig) -> Self {
        SaleEventHandler {
            processor,
            config,
            failures: Mutex::new(FailureTracker::new(FAILURE_TTL, MAX_TRACKED_FAILURES)),
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Handles one delivery.
    pub async fn handle(&self, payload: &[u8], info: &DeliveryInfo) -> DeliveryOutcome {
        let request = match SaleRequest::from_json(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(delivery_tag = info.delivery_tag, error = %e, "Undecodable sale message");
                return DeliveryOutcome::DeadLetter {
                    reason: format!("undecodable payload: {e}"),
                };
            }
        };

        if let Err(e) = validate_sale_request(&request) {
            warn!(delivery_tag = info.delivery_tag, error = %e, "Malformed sale message");
            return DeliveryOutcome::DeadLetter {
                reason: format!("invalid sale: {e}"),
            };
        }

        if info.redelivered
            && self.config.redelivery_policy == RedeliveryPolicy::AcknowledgeWithoutProcessing
        {
            info!(
                delivery_tag = info.delivery_tag,
                pdv_sale_id = ?request.pdv_sale_id,
                "Redelivered message acknowledged without processing"
            );
            return DeliveryOutcome::Processed;
        }

        let key = failure_key(&request, payload);

        match self.processor.process(&request).await {
            Ok(outcome) => {
                self.failures.lock().await.clear(&key);
                let summary = outcome.summary();
                info!(
                    delivery_tag = info.delivery_tag,
                    sale_id = summary.sale_id,
                    pdv_sale_id = ?summary.pdv_sale_id,
                    created = outcome.is_created(),
                    "Sale message processed"
                );
                DeliveryOutcome::Processed
            }
            Err(e) => {
                let attempts = self.record_failure(&key, info).await;

                if attempts >= self.config.max_deliveries {
                    self.failures.lock().await.clear(&key);
                    error!(
                        delivery_tag = info.delivery_tag,
                        pdv_sale_id = ?request.pdv_sale_id,
                        attempts,
                        error = %e,
                        "Sale message exceeded delivery limit"
                    );
                    DeliveryOutcome::DeadLetter {
                        reason: format!("failed after {attempts} deliveries: {e}"),
                    }
                } else {
                    warn!(
                        delivery_tag = info.delivery_tag,
                        pdv_sale_id = ?request.pdv_sale_id,
                        attempts,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Sale message failed, requeueing"
                    );
                    DeliveryOutcome::Requeue
                }
            }
        }
    }

    /// Counts this failure and returns the attempt number of this delivery.
    async fn record_failure(&self, key: &str, info: &DeliveryInfo) -> u32 {
        let local = self.failures.lock().await.record(key, Instant::now());
        let from_broker = info.delivery_count.map(|c| c.saturating_add(1)).unwrap_or(1);
        local.max(from_broker)
    }
}

/// Identity of a message across redeliveries.
fn failure_key(request: &SaleRequest, payload: &[u8]) -> String {
    match request.pdv_sale_id {
        Some(id) => format!("pdv:{id}"),
        None => {
            let mut hasher = DefaultHasher::new();
            payload.hash(&mut hasher);
            format!("payload:{:016x}", hasher.finish())
        }
    }
}

// =============================================================================
// Settlement
// =============================================================================

/// Ack / nack of one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> SyncResult<()>;
    async fn requeue(&self) -> SyncResult<()>;
}

/// Destination for messages that will not be retried.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, payload: &[u8], reason: &str) -> SyncResult<()>;
}

/// Broker action actually taken for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
    DeadLettered,
}

/// Applies an outcome to the broker.
pub async fn settle(
    outcome: &DeliveryOutcome,
    payload: &[u8],
    acker: &dyn Acknowledger,
    dead_letters: &dyn DeadLetterSink,
) -> SyncResult<Settlement> {
    match outcome {
        DeliveryOutcome::Processed => {
            acker.ack().await?;
            Ok(Settlement::Acked)
        }
        DeliveryOutcome::Requeue => {
            acker.requeue().await?;
            Ok(Settlement::Requeued)
        }
        DeliveryOutcome::DeadLetter { reason } => {
            match dead_letters.dead_letter(payload, reason).await {
                Ok(()) => {
                    acker.ack().await?;
                    debug!(%reason, "Message moved to dead-letter queue");
                    Ok(Settlement::DeadLettered)
                }
                Err(e) => {
                    error!(?e, "Dead-letter publish failed, requeueing instead");
                    acker.requeue().await?;
                    Ok(Settlement::Requeued)
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use sgemp_core::{MovementReason, NewStockMovement};
    use sgemp_db::{seed_defaults, Database, DbConfig, SeedReport, ServiceError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    // =========================================================================
    // Fakes
    // =========================================================================

    /// Fails every call.
    struct FailingProcessor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SaleProcessor for FailingProcessor {
        async fn process(&self, _request: &SaleRequest) -> ServiceResult<SaleOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Timeout(Duration::from_secs(30)))
        }
    }

    #[derive(Default)]
    struct RecordingAcker {
        calls: StdMutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self) -> SyncResult<()> {
            self.calls.lock().unwrap().push("ack");
            Ok(())
        }

        async fn requeue(&self) -> SyncResult<()> {
            self.calls.lock().unwrap().push("requeue");
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        fail: bool,
        messages: StdMutex<Vec<(Vec<u8>, String)>>,
    }

    #[async_trait]
    impl DeadLetterSink for RecordingSink {
        async fn dead_letter(&self, payload: &[u8], reason: &str) -> SyncResult<()> {
            if self.fail {
                return Err(SyncError::PublishFailed {
                    queue: "finalized_sale.dead_letter".into(),
                    reason: "channel closed".into(),
                });
            }
            self.messages
                .lock()
                .unwrap()
                .push((payload.to_vec(), reason.to_string()));
            Ok(())
        }
    }

    async fn setup() -> (Database, SeedReport) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seeded = seed_defaults(&db).await.unwrap().unwrap();
        (db, seeded)
    }

    fn message(seeded: &SeedReport, product: usize, quantity: i64, pdv_sale_id: i64) -> Vec<u8> {
        format!(
            r#"{{
                "customerId": {},
                "items": [{{ "productId": {}, "quantity": {} }}],
                "paymentData": [{{ "amount": 13.00, "paymentMethodId": {}, "details": "troco 0" }}],
                "pdvSaleId": {}
            }}"#,
            seeded.customer_id,
            seeded.product_ids[product],
            quantity,
            seeded.payment_method_ids[0],
            pdv_sale_id
        )
        .into_bytes()
    }

    fn first_delivery(tag: u64) -> DeliveryInfo {
        DeliveryInfo {
            delivery_tag: tag,
            redelivered: false,
            delivery_count: None,
        }
    }

    // =========================================================================
    // Handler
    // =========================================================================

    #[tokio::test]
    async fn test_valid_message_is_processed_once() {
        let (db, seeded) = setup().await;
        let handler = SaleEventHandler::new(db.orchestrator(), HandlerConfig::default());
        let payload = message(&seeded, 0, 2, 42);

        let first = handler.handle(&payload, &first_delivery(1)).await;
        assert_eq!(first, DeliveryOutcome::Processed);

        // ack lost, broker redelivers
        let redelivery = DeliveryInfo {
            delivery_tag: 2,
            redelivered: true,
            delivery_count: Some(1),
        };
        let second = handler.handle(&payload, &redelivery).await;
        assert_eq!(second, DeliveryOutcome::Processed);

        assert_eq!(db.sales().count().await.unwrap(), 1);
        assert_eq!(db.stock().current_stock(seeded.product_ids[0]).await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_redelivery_after_failure_is_retried() {
        let (db, seeded) = setup().await;
        let handler = SaleEventHandler::new(db.orchestrator(), HandlerConfig::default());

        // product 4 has one unit; the first attempt fails
        let payload = message(&seeded, 3, 2, 7);
        assert_eq!(
            handler.handle(&payload, &first_delivery(1)).await,
            DeliveryOutcome::Requeue
        );
        assert_eq!(db.sales().count().await.unwrap(), 0);

        // stock arrives before the redelivery
        db.stock()
            .register_movement(NewStockMovement::entry(
                seeded.product_ids[3],
                5,
                MovementReason::Other("purchase".into()),
            ))
            .await
            .unwrap();

        let redelivery = DeliveryInfo {
            delivery_tag: 2,
            redelivered: true,
            delivery_count: Some(1),
        };
        assert_eq!(
            handler.handle(&payload, &redelivery).await,
            DeliveryOutcome::Processed
        );
        assert_eq!(db.stock().current_stock(seeded.product_ids[3]).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_legacy_policy_acks_redeliveries_untouched() {
        let (db, seeded) = setup().await;
        let handler = SaleEventHandler::new(
            db.orchestrator(),
            HandlerConfig {
                max_deliveries: 5,
                redelivery_policy: RedeliveryPolicy::AcknowledgeWithoutProcessing,
            },
        );

        let redelivery = DeliveryInfo {
            delivery_tag: 9,
            redelivered: true,
            delivery_count: None,
        };
        let outcome = handler.handle(&message(&seeded, 0, 1, 8), &redelivery).await;

        assert_eq!(outcome, DeliveryOutcome::Processed);
        assert_eq!(db.sales().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_garbage_is_dead_lettered() {
        let (db, _) = setup().await;
        let handler = SaleEventHandler::new(db.orchestrator(), HandlerConfig::default());

        let outcome = handler.handle(b"not json at all", &first_delivery(1)).await;
        assert!(matches!(outcome, DeliveryOutcome::DeadLetter { .. }));

        let empty_sale = br#"{ "customerId": 1, "items": [], "paymentData": [] }"#;
        let outcome = handler.handle(empty_sale, &first_delivery(2)).await;
        match outcome {
            DeliveryOutcome::DeadLetter { reason } => assert!(reason.contains("items")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_counter_enforces_ceiling() {
        let handler = SaleEventHandler::new(
            FailingProcessor {
                calls: AtomicUsize::new(0),
            },
            HandlerConfig {
                max_deliveries: 3,
                redelivery_policy: RedeliveryPolicy::Reprocess,
            },
        );
        let payload = br#"{
            "customerId": 1,
            "items": [{ "productId": 1, "quantity": 1 }],
            "paymentData": [{ "amount": 5.0, "paymentMethodId": 1 }],
            "pdvSaleId": 99
        }"#;

        let mut outcomes = Vec::new();
        for tag in 1..=3 {
            let info = DeliveryInfo {
                delivery_tag: tag,
                redelivered: tag > 1,
                delivery_count: None,
            };
            outcomes.push(handler.handle(payload, &info).await);
        }

        assert_eq!(outcomes[0], DeliveryOutcome::Requeue);
        assert_eq!(outcomes[1], DeliveryOutcome::Requeue);
        assert!(matches!(outcomes[2], DeliveryOutcome::DeadLetter { .. }));
        assert_eq!(handler.processor.calls.load(Ordering::SeqCst), 3);

        // the counter restarts after dead-lettering
        assert_eq!(
            handler.handle(payload, &first_delivery(4)).await,
            DeliveryOutcome::Requeue
        );
    }

    #[tokio::test]
    async fn test_broker_count_enforces_ceiling() {
        let handler = SaleEventHandler::new(
            FailingProcessor {
                calls: AtomicUsize::new(0),
            },
            HandlerConfig {
                max_deliveries: 3,
                redelivery_policy: RedeliveryPolicy::Reprocess,
            },
        );
        let payload = br#"{
            "customerId": 1,
            "items": [{ "productId": 1, "quantity": 1 }],
            "paymentData": [{ "amount": 5.0, "paymentMethodId": 1 }]
        }"#;

        // a fresh process sees the third delivery of this message
        let info = DeliveryInfo {
            delivery_tag: 1,
            redelivered: true,
            delivery_count: Some(2),
        };
        assert!(matches!(
            handler.handle(payload, &info).await,
            DeliveryOutcome::DeadLetter { .. }
        ));
    }

    #[test]
    fn test_failure_entries_expire() {
        let start = Instant::now();
        let mut tracker = FailureTracker::new(Duration::from_secs(60), 100);

        assert_eq!(tracker.record("pdv:1", start), 1);
        assert_eq!(tracker.record("pdv:1", start + Duration::from_secs(10)), 2);
        assert_eq!(tracker.record("pdv:2", start + Duration::from_secs(10)), 1);

        // pdv:1 went to another consumer and never came back
        let later = start + Duration::from_secs(75);
        assert_eq!(tracker.record("pdv:3", later), 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.record("pdv:1", later), 1);
    }

    #[test]
    fn test_failure_tracker_is_bounded() {
        let start = Instant::now();
        let mut tracker = FailureTracker::new(Duration::from_secs(3600), 2);

        tracker.record("pdv:1", start);
        tracker.record("pdv:2", start + Duration::from_secs(1));
        tracker.record("pdv:2", start + Duration::from_secs(2));
        tracker.record("pdv:3", start + Duration::from_secs(3));

        assert_eq!(tracker.len(), 2);
        // pdv:1 was the stalest and was evicted
        assert_eq!(tracker.record("pdv:1", start + Duration::from_secs(4)), 1);
        assert_eq!(tracker.len(), 2);
        tracker.clear("pdv:1");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_failure_key() {
        let with_id = SaleRequest::from_json(
            br#"{ "customerId": 1, "items": [], "paymentData": [], "pdvSaleId": 12 }"#,
        )
        .unwrap();
        assert_eq!(failure_key(&with_id, b"ignored"), "pdv:12");

        let without = SaleRequest::from_json(br#"{ "customerId": 1 }"#).unwrap();
        assert_eq!(failure_key(&without, b"a"), failure_key(&without, b"a"));
        assert_ne!(failure_key(&without, b"a"), failure_key(&without, b"b"));
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    #[tokio::test]
    async fn test_settle_maps_outcomes() {
        let acker = RecordingAcker::default();
        let sink = RecordingSink::default();

        let acked = settle(&DeliveryOutcome::Processed, b"{}", &acker, &sink).await.unwrap();
        let requeued = settle(&DeliveryOutcome::Requeue, b"{}", &acker, &sink).await.unwrap();
        let dead = settle(
            &DeliveryOutcome::DeadLetter {
                reason: "undecodable payload".into(),
            },
            b"garbage",
            &acker,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(acked, Settlement::Acked);
        assert_eq!(requeued, Settlement::Requeued);
        assert_eq!(dead, Settlement::DeadLettered);
        assert_eq!(*acker.calls.lock().unwrap(), vec!["ack", "requeue", "ack"]);

        let parked = sink.messages.lock().unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].0, b"garbage".to_vec());
        assert_eq!(parked[0].1, "undecodable payload");
    }

    #[tokio::test]
    async fn test_failed_dead_letter_requeues() {
        let acker = RecordingAcker::default();
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };

        let settlement = settle(
            &DeliveryOutcome::DeadLetter {
                reason: "failed after 5 deliveries".into(),
            },
            b"{}",
            &acker,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(settlement, Settlement::Requeued);
        assert_eq!(*acker.calls.lock().unwrap(), vec!["requeue"]);
    }
}
