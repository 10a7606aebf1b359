//! # Sale Transaction Orchestrator
//!
//! Writes one sale (header, items, stock exits, payments) atomically and
//! idempotently. Shared by `POST /sale` and the queue consumer.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_sale(request)                                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate shape ─────────────────────────────────────► Err(Validation)  │
//! │       │                                                                 │
//! │  ┌────┼──────────────── deadline ───────────────────────────────────┐  │
//! │  │    ▼                                                              │  │
//! │  │  BEGIN IMMEDIATE  (write lock held from here to COMMIT)          │  │
//! │  │    │                                                              │  │
//! │  │    ├── pdvSaleId already stored? ──► ROLLBACK ─► AlreadyProcessed │  │
//! │  │    ├── customer exists?          ──► CustomerNotFound             │  │
//! │  │    ├── batched prices + payment methods ──► SalePlan              │  │
//! │  │    ├── INSERT sales (total 0)                                      │  │
//! │  │    ├── Σ qty per product ≤ current stock? ──► InsufficientStock   │  │
//! │  │    ├── INSERT sale_items (one statement)                          │  │
//! │  │    ├── append EXIT per item (reason sale, sale_id)                │  │
//! │  │    ├── UPDATE sales.total_cents                                   │  │
//! │  │    ├── INSERT payments (one statement)                            │  │
//! │  │    └── PDV role: INSERT sale_outbox                               │  │
//! │  └────┼──────────────────────────────────────────────────────────────┘  │
//! │       ▼                                                                 │
//! │  COMMIT ──► Created(summary)        any error / expiry ──► ROLLBACK    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{DbError, ServiceError, ServiceResult};
use crate::pool::Database;
use crate::repository::customer::CustomerRepository;
use crate::repository::outbox::SaleOutboxRepository;
use crate::repository::payment_method::PaymentMethodRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::stock::StockLedger;
use crate::tx;
use sgemp_core::plan::{payment_method_ids, product_ids};
use sgemp_core::validation::validate_sale_request;
use sgemp_core::{
    build_sale_plan, CoreError, NewStockMovement, SaleOutcome, SaleRequest, SaleSummary,
    ValidationError,
};

/// Default bound on one orchestration.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

// =============================================================================
// Configuration
// =============================================================================

/// Which side of the bridge this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaleRole {
    /// Receives sales (HTTP and queue) into the central database.
    #[default]
    BackOffice,
    /// Point of sale: sales committed here are also queued for publication.
    Pdv,
}

impl FromStr for SaleRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "back-office" | "backoffice" | "back_office" => Ok(SaleRole::BackOffice),
            "pdv" => Ok(SaleRole::Pdv),
            other => Err(format!("unknown role '{other}' (expected back-office or pdv)")),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub role: SaleRole,
    /// Bound on lock acquisition plus all writes of one sale.
    pub deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            role: SaleRole::BackOffice,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

enum Step {
    Created(SaleSummary),
    AlreadyProcessed(SaleSummary),
}

/// The sale transaction.
///
/// ## Usage
/// ```rust,ignore
/// let orchestrator = SaleOrchestrator::new(db.clone())
///     .with_deadline(Duration::from_secs(10));
///
/// match orchestrator.create_sale(&request).await? {
///     SaleOutcome::Created(summary) => { /* 201 */ }
///     SaleOutcome::AlreadyProcessed(summary) => { /* 200, nothing written */ }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SaleOrchestrator {
    db: Database,
    config: OrchestratorConfig,
}

impl SaleOrchestrator {
    /// Creates an orchestrator with default settings (back office, 30 s).
    pub fn new(db: Database) -> Self {
        SaleOrchestrator {
            db,
            config: OrchestratorConfig::default(),
        }
    }

    /// Creates an orchestrator with explicit settings.
    pub fn with_config(db: Database, config: OrchestratorConfig) -> Self {
        SaleOrchestrator { db, config }
    }

    /// Sets the deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    /// Sets the role.
    pub fn with_role(mut self, role: SaleRole) -> Self {
        self.config.role = role;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Ingests one sale.
    ///
    /// Returns `AlreadyProcessed` with the stored summary when a sale with
    /// the same `pdvSaleId` exists; nothing is written in that case.
    pub async fn create_sale(&self, request: &SaleRequest) -> ServiceResult<SaleOutcome> {
        validate_sale_request(request)?;

        let mut conn = self.db.pool().acquire().await?;
        let deadline = self.config.deadline;

        // the deadline covers waiting for the write lock too
        let work = async {
            tx::begin_in(&mut conn).await?;
            self.run(&mut conn, request).await
        };

        let result = match timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(deadline)),
        };

        match result {
            Ok(Step::Created(summary)) => {
                tx::commit(conn)
                    .await
                    .map_err(|e| classify(e.into(), request))?;
                info!(
                    sale_id = summary.sale_id,
                    pdv_sale_id = ?summary.pdv_sale_id,
                    total = %summary.total,
                    items = summary.items.len(),
                    "Sale created"
                );
                Ok(SaleOutcome::Created(summary))
            }
            Ok(Step::AlreadyProcessed(summary)) => {
                tx::rollback(conn).await;
                info!(
                    sale_id = summary.sale_id,
                    pdv_sale_id = ?summary.pdv_sale_id,
                    "Sale already processed, skipping"
                );
                Ok(SaleOutcome::AlreadyProcessed(summary))
            }
            Err(e) => {
                tx::rollback(conn).await;
                let e = classify(e, request);
                warn!(error = %e, pdv_sale_id = ?request.pdv_sale_id, "Sale rolled back");
                Err(e)
            }
        }
    }

    async fn run(&self, conn: &mut SqliteConnection, request: &SaleRequest) -> ServiceResult<Step> {
        if let Some(pdv_sale_id) = request.pdv_sale_id {
            if let Some(existing) = SaleRepository::find_by_pdv_sale_id_in(conn, pdv_sale_id).await? {
                let summary = SaleRepository::summary_in(conn, existing.id)
                    .await?
                    .ok_or_else(|| DbError::not_found("Sale", existing.id))?;
                return Ok(Step::AlreadyProcessed(summary));
            }
        }

        let customer_id = request
            .customer_id
            .ok_or_else(|| ValidationError::required("customerId"))?;
        if !CustomerRepository::exists_in(conn, customer_id).await? {
            return Err(CoreError::CustomerNotFound(customer_id).into());
        }

        let prices = ProductRepository::find_prices(conn, &product_ids(request)).await?;
        let methods =
            PaymentMethodRepository::existing_ids(conn, &payment_method_ids(request)).await?;
        let plan = build_sale_plan(request, &prices, &methods)?;

        let sale_id = SaleRepository::insert_header(conn, plan.customer_id, plan.pdv_sale_id).await?;

        for (&product_id, &requested) in plan.requested_by_product() {
            let available = StockLedger::current_stock_in(conn, product_id).await?;
            debug!(product_id, available, requested, "Stock check");
            if available < requested {
                return Err(CoreError::InsufficientStock {
                    product_id,
                    available,
                    requested,
                }
                .into());
            }
        }

        SaleRepository::insert_items(conn, sale_id, &plan.items).await?;

        for item in &plan.items {
            let exit = NewStockMovement::sale_exit(item.product_id, item.quantity, sale_id);
            StockLedger::append_movement(conn, &exit).await?;
        }

        let paid = request.payments_total();
        if paid != plan.total {
            warn!(
                sale_id,
                total = %plan.total,
                paid = %paid,
                "Payments do not add up to the sale total"
            );
        }

        SaleRepository::update_total(conn, sale_id, plan.total).await?;
        SaleRepository::insert_payments(conn, sale_id, &plan.payments).await?;

        if self.config.role == SaleRole::Pdv {
            SaleOutboxRepository::enqueue_in(conn, sale_id, request).await?;
        }

        let summary = SaleRepository::summary_in(conn, sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))?;

        Ok(Step::Created(summary))
    }
}

/// Reports a lost race on `pdv_sale_id` as a duplicate sale.
fn classify(err: ServiceError, request: &SaleRequest) -> ServiceError {
    if let (ServiceError::Db(db_err), Some(pdv_sale_id)) = (&err, request.pdv_sale_id) {
        if db_err.is_unique_violation_on("sales.pdv_sale_id") {
            return ServiceError::DuplicateSale(pdv_sale_id);
        }
    }
    err
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{seed_defaults, SeedReport};
    use crate::DbConfig;
    use sgemp_core::{Money, MovementType, PaymentLine, SaleLine};

    async fn setup() -> (Database, SeedReport) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seeded = seed_defaults(&db).await.unwrap().unwrap();
        (db, seeded)
    }

    fn sale(
        seeded: &SeedReport,
        lines: &[(usize, i64)],
        amount_cents: i64,
        pdv_sale_id: Option<i64>,
    ) -> SaleRequest {
        SaleRequest {
            customer_id: Some(seeded.customer_id),
            items: lines
                .iter()
                .map(|&(product, quantity)| SaleLine {
                    product_id: seeded.product_ids[product],
                    quantity,
                })
                .collect(),
            payment_data: vec![PaymentLine {
                amount: Money::from_cents(amount_cents),
                payment_method_id: seeded.payment_method_ids[0],
                details: None,
            }],
            pdv_sale_id,
        }
    }

    async fn stock(db: &Database, product_id: i64) -> i64 {
        db.stock().current_stock(product_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_sale_is_written_with_exits_and_payments() {
        let (db, seeded) = setup().await;
        let (p1, p2) = (seeded.product_ids[0], seeded.product_ids[1]);

        // 2 × 5.00 + 1 × 3.00
        let request = sale(&seeded, &[(0, 2), (1, 1)], 1300, Some(42));
        let outcome = db.orchestrator().create_sale(&request).await.unwrap();

        assert!(outcome.is_created());
        let summary = outcome.summary();
        assert_eq!(summary.total, Money::from_cents(1300));
        assert_eq!(summary.pdv_sale_id, Some(42));
        assert_eq!(summary.items.len(), 2);
        assert_eq!(summary.items[0].unit_price_cents, 500);
        assert_eq!(summary.items[0].value_cents, 1000);
        assert_eq!(summary.payments.len(), 1);
        assert_eq!(summary.payments[0].amount_cents, 1300);

        assert_eq!(stock(&db, p1).await, 16);
        assert_eq!(stock(&db, p2).await, 23);

        let exits = db.stock().movements_for_sale(summary.sale_id).await.unwrap();
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|m| m.movement_type == MovementType::Exit));
        assert!(exits.iter().all(|m| m.reason.as_deref() == Some("sale")));

        // back office never fills the outbox
        assert_eq!(db.sale_outbox().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_same_pdv_sale_id_is_processed_once() {
        let (db, seeded) = setup().await;
        let p1 = seeded.product_ids[0];
        let request = sale(&seeded, &[(0, 2)], 1000, Some(42));

        let first = db.orchestrator().create_sale(&request).await.unwrap();
        let second = db.orchestrator().create_sale(&request).await.unwrap();

        assert!(first.is_created());
        assert!(matches!(second, SaleOutcome::AlreadyProcessed(_)));
        assert_eq!(first.summary().sale_id, second.summary().sale_id);
        assert_eq!(db.sales().count().await.unwrap(), 1);
        assert_eq!(stock(&db, p1).await, 16);
        assert_eq!(db.stock().movements_for_product(p1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stock_is_derived_across_sales() {
        let (db, seeded) = setup().await;
        let p1 = seeded.product_ids[0];

        db.orchestrator()
            .create_sale(&sale(&seeded, &[(0, 5)], 2500, Some(1)))
            .await
            .unwrap();
        db.orchestrator()
            .create_sale(&sale(&seeded, &[(0, 3)], 1500, Some(2)))
            .await
            .unwrap();

        // 18 − 5 − 3
        assert_eq!(stock(&db, p1).await, 10);
    }

    #[tokio::test]
    async fn test_insufficient_stock_writes_nothing() {
        let (db, seeded) = setup().await;
        let p4 = seeded.product_ids[3];

        let err = db
            .orchestrator()
            .create_sale(&sale(&seeded, &[(0, 1), (3, 2)], 8500, Some(9)))
            .await
            .unwrap_err();

        match err {
            ServiceError::Core(CoreError::InsufficientStock {
                product_id,
                available,
                requested,
            }) => {
                assert_eq!(product_id, p4);
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(db.sales().count().await.unwrap(), 0);
        assert_eq!(stock(&db, seeded.product_ids[0]).await, 18);
        assert_eq!(stock(&db, p4).await, 1);
        assert!(db.sales().find_by_pdv_sale_id(9).await.unwrap().is_none());

        for table in ["sale_items", "payments"] {
            let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(db.pool())
                .await
                .unwrap();
            assert_eq!(rows, 0, "{table}");
        }
        let exits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE type = 'EXIT'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(exits, 0);
    }

    #[tokio::test]
    async fn test_repeated_lines_are_checked_together() {
        let (db, seeded) = setup().await;

        // two lines of one unit each against a stock of one
        let err = db
            .orchestrator()
            .create_sale(&sale(&seeded, &[(3, 1), (3, 1)], 8000, None))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Core(CoreError::InsufficientStock { requested: 2, .. })
        ));
        assert_eq!(stock(&db, seeded.product_ids[3]).await, 1);
    }

    #[tokio::test]
    async fn test_item_price_is_a_snapshot() {
        let (db, seeded) = setup().await;
        let p1 = seeded.product_ids[0];

        let created = db
            .orchestrator()
            .create_sale(&sale(&seeded, &[(0, 1)], 500, None))
            .await
            .unwrap();

        sqlx::query("UPDATE products SET price_cents = 999 WHERE id = ?1")
            .bind(p1)
            .execute(db.pool())
            .await
            .unwrap();

        let reloaded = db
            .sales()
            .summary(created.summary().sale_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.items[0].unit_price_cents, 500);
        assert_eq!(reloaded.total, Money::from_cents(500));
    }

    #[tokio::test]
    async fn test_unknown_references_are_rejected() {
        let (db, seeded) = setup().await;

        let mut unknown_product = sale(&seeded, &[(0, 1)], 500, None);
        unknown_product.items[0].product_id = 999;
        let err = db.orchestrator().create_sale(&unknown_product).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::Validation(ValidationError::UnknownReference { id: 999, .. }))
        ));

        let mut unknown_method = sale(&seeded, &[(0, 1)], 500, None);
        unknown_method.payment_data[0].payment_method_id = 77;
        let err = db.orchestrator().create_sale(&unknown_method).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::Validation(ValidationError::UnknownReference { id: 77, .. }))
        ));

        let mut unknown_customer = sale(&seeded, &[(0, 1)], 500, None);
        unknown_customer.customer_id = Some(555);
        let err = db.orchestrator().create_sale(&unknown_customer).await.unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::CustomerNotFound(555))));
        assert!(err.is_not_found());

        assert_eq!(db.sales().count().await.unwrap(), 0);
        assert_eq!(stock(&db, seeded.product_ids[0]).await, 18);
    }

    #[tokio::test]
    async fn test_invalid_shape_fails_before_io() {
        let (db, seeded) = setup().await;
        let mut request = sale(&seeded, &[(0, 1)], 500, None);
        request.items.clear();

        let err = db.orchestrator().create_sale(&request).await.unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(err, ServiceError::Core(CoreError::Validation(ValidationError::Empty { .. }))));
    }

    #[tokio::test]
    async fn test_pdv_role_queues_outbox_in_same_transaction() {
        let (db, seeded) = setup().await;
        let orchestrator = db.orchestrator().with_role(SaleRole::Pdv);

        let outcome = orchestrator
            .create_sale(&sale(&seeded, &[(1, 2)], 600, None))
            .await
            .unwrap();

        let pending = db.sale_outbox().get_pending(10, 5).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sale_id, outcome.summary().sale_id);

        let payload = SaleRequest::from_json(pending[0].payload.as_bytes()).unwrap();
        assert_eq!(payload.pdv_sale_id, Some(outcome.summary().sale_id));

        // a failed PDV sale leaves no outbox row behind
        orchestrator
            .create_sale(&sale(&seeded, &[(3, 5)], 600, None))
            .await
            .unwrap_err();
        assert_eq!(db.sale_outbox().count_pending().await.unwrap(), 1);
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("pdv".parse::<SaleRole>().unwrap(), SaleRole::Pdv);
        assert_eq!("Back-Office".parse::<SaleRole>().unwrap(), SaleRole::BackOffice);
        assert!("cashier".parse::<SaleRole>().is_err());
    }

    // =========================================================================
    // Concurrency (file database, several connections)
    // =========================================================================

    struct TempDb {
        path: std::path::PathBuf,
    }

    impl TempDb {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "sgemp-orchestrator-{}-{}.db",
                name,
                std::process::id()
            ));
            let db = TempDb { path };
            db.cleanup();
            db
        }

        fn cleanup(&self) {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
            }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            self.cleanup();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sales_cannot_overdraw() {
        let file = TempDb::new("race");
        let db = Database::new(DbConfig::new(file.path.clone())).await.unwrap();
        let seeded = seed_defaults(&db).await.unwrap().unwrap();

        // stock of product 4 is 1; both sales want it
        let a = sale(&seeded, &[(3, 1)], 4000, Some(100));
        let b = sale(&seeded, &[(3, 1)], 4000, Some(101));

        let (left, right) = (db.orchestrator(), db.orchestrator());
        let (first, second) = tokio::join!(left.create_sale(&a), right.create_sale(&b));

        let created = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Ok(o) if o.is_created()))
            .count();
        let rejected = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::Core(CoreError::InsufficientStock { .. }))))
            .count();

        assert_eq!(created, 1);
        assert_eq!(rejected, 1);
        assert_eq!(stock(&db, seeded.product_ids[3]).await, 0);
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_redelivery_creates_one_sale() {
        let file = TempDb::new("redelivery");
        let db = Database::new(DbConfig::new(file.path.clone())).await.unwrap();
        let seeded = seed_defaults(&db).await.unwrap().unwrap();
        let request = sale(&seeded, &[(0, 1)], 500, Some(77));

        let (left, right) = (db.orchestrator(), db.orchestrator());
        let (first, second) = tokio::join!(left.create_sale(&request), right.create_sale(&request));

        let first = first.unwrap();
        let second = second.unwrap();
        assert_ne!(first.is_created(), second.is_created());
        assert_eq!(first.summary().sale_id, second.summary().sale_id);
        assert_eq!(db.sales().count().await.unwrap(), 1);
        assert_eq!(stock(&db, seeded.product_ids[0]).await, 17);
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deadline_expiry_rolls_back() {
        let file = TempDb::new("deadline");
        let db = Database::new(DbConfig::new(file.path.clone()).busy_timeout(Duration::from_millis(500)))
            .await
            .unwrap();
        let seeded = seed_defaults(&db).await.unwrap().unwrap();

        // another writer holds the lock past the deadline
        let mut holder = db.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *holder).await.unwrap();

        let err = db
            .orchestrator()
            .with_deadline(Duration::from_millis(100))
            .create_sale(&sale(&seeded, &[(0, 1)], 500, Some(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Timeout(_)));
        assert!(err.is_retryable());

        sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();
        drop(holder);

        assert_eq!(db.sales().count().await.unwrap(), 0);

        // the same message succeeds once the lock is free
        let retried = db
            .orchestrator()
            .create_sale(&sale(&seeded, &[(0, 1)], 500, Some(5)))
            .await
            .unwrap();
        assert!(retried.is_created());
        db.close().await;
    }
}
