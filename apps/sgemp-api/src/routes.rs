//! # HTTP Routes
//!
//! ```text
//! POST /sale                 SaleRequest ──► SaleOrchestrator
//!                              201 Created       new sale
//!                              200 OK            pdvSaleId already processed
//! GET  /sale/{id}            SaleSummary
//! GET  /stock                StockPage       ?page=1&perPage=20&id=3
//! GET  /stock/{product_id}   { productId, stock }
//! GET  /stock/ean/{ean}      { productId, ean, stock }
//! POST /stock/entry          append one movement to the ledger
//! GET  /health               database reachability
//! ```

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use sgemp_core::validation::collect_sale_request_errors;
use sgemp_core::{
    CoreError, MovementReason, MovementType, NewStockMovement, SaleRequest, SaleSummary,
    StockMovement, StockPage, ValidationError,
};
use sgemp_db::{Database, SaleOrchestrator};

use crate::error::ApiError;

const DEFAULT_PER_PAGE: i64 = 20;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub orchestrator: SaleOrchestrator,
}

impl AppState {
    pub fn new(db: Database, orchestrator: SaleOrchestrator) -> Self {
        AppState { db, orchestrator }
    }
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sale", post(create_sale))
        .route("/sale/{id}", get(get_sale))
        .route("/stock", get(list_stock))
        .route("/stock/entry", post(register_movement))
        .route("/stock/ean/{ean}", get(stock_by_ean))
        .route("/stock/{product_id}", get(stock_by_product))
        .route("/health", get(health))
        .with_state(state)
}

// =============================================================================
// Sales
// =============================================================================

async fn create_sale(
    State(state): State<AppState>,
    payload: Result<Json<SaleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SaleSummary>), ApiError> {
    let Json(request) = payload?;

    let errors = collect_sale_request_errors(&request);
    if !errors.is_empty() {
        return Err(ApiError::validation(&errors));
    }

    let outcome = state.orchestrator.create_sale(&request).await?;
    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(outcome.into_summary())))
}

async fn get_sale(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<SaleSummary>, ApiError> {
    let Path(id) = id?;

    state
        .db
        .sales()
        .summary(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(CoreError::SaleNotFound(id).to_string()))
}

// =============================================================================
// Stock
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductStock {
    product_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ean: Option<String>,
    stock: i64,
}

async fn list_stock(
    State(state): State<AppState>,
    query: Result<Query<StockQuery>, QueryRejection>,
) -> Result<Json<StockPage>, ApiError> {
    let Query(query) = query?;

    let page = state
        .db
        .stock()
        .stock_levels(
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(DEFAULT_PER_PAGE),
            query.id,
        )
        .await?;

    if page.data.is_empty() {
        return Err(ApiError::not_found("No stock found"));
    }

    Ok(Json(page))
}

async fn stock_by_product(
    State(state): State<AppState>,
    product_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ProductStock>, ApiError> {
    let Path(product_id) = product_id?;
    let stock = state.db.stock().stock_of(product_id).await?;

    Ok(Json(ProductStock {
        product_id,
        ean: None,
        stock,
    }))
}

async fn stock_by_ean(
    State(state): State<AppState>,
    Path(ean): Path<String>,
) -> Result<Json<ProductStock>, ApiError> {
    let product = state
        .db
        .products()
        .get_by_ean(&ean)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Product not found: EAN {ean}")))?;

    let stock = state.db.stock().current_stock(product.id).await?;

    Ok(Json(ProductStock {
        product_id: product.id,
        ean: product.ean,
        stock,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovementRequest {
    product_id: i64,
    quantity: i64,
    #[serde(default, rename = "type")]
    movement_type: Option<MovementType>,
    #[serde(default)]
    sale_id: Option<i64>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct MovementResponse {
    movement: StockMovement,
    stock: i64,
}

impl MovementRequest {
    fn into_movement(self) -> Result<NewStockMovement, ValidationError> {
        match self.movement_type.unwrap_or(MovementType::Entry) {
            MovementType::Entry => {
                let reason = MovementReason::from(self.reason.as_deref().unwrap_or("entry"));
                if reason == MovementReason::InitialStock {
                    return Err(ValidationError::InvalidFormat {
                        field: "reason".to_string(),
                        reason: "initial_stock is only written when a product is created"
                            .to_string(),
                    });
                }
                Ok(NewStockMovement::entry(self.product_id, self.quantity, reason))
            }
            MovementType::Exit => {
                let sale_id = self.sale_id.ok_or_else(|| ValidationError::required("saleId"))?;
                Ok(NewStockMovement::sale_exit(self.product_id, self.quantity, sale_id))
            }
        }
    }
}

async fn register_movement(
    State(state): State<AppState>,
    payload: Result<Json<MovementRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MovementResponse>), ApiError> {
    let Json(request) = payload?;
    let movement = request
        .into_movement()
        .map_err(|e| ApiError::validation(&[e]))?;

    if let Some(sale_id) = movement.sale_id {
        if state.db.sales().get_by_id(sale_id).await?.is_none() {
            return Err(ApiError::not_found(CoreError::SaleNotFound(sale_id).to_string()));
        }
    }

    let ledger = state.db.stock();
    let movement = ledger.register_movement(movement).await?;
    let stock = ledger.current_stock(movement.product_id).await?;

    info!(product_id = movement.product_id, stock, "Stock movement registered over HTTP");
    Ok((StatusCode::CREATED, Json(MovementResponse { movement, stock })))
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    if state.db.health_check().await {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable" })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use sgemp_db::{seed_defaults, DbConfig, SeedReport};
    use tower::ServiceExt;

    async fn setup() -> (Router, Database, SeedReport) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seeded = seed_defaults(&db).await.unwrap().unwrap();
        let app = router(AppState::new(db.clone(), db.orchestrator()));
        (app, db, seeded)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn sale_body(seeded: &SeedReport, quantity: i64, pdv_sale_id: Option<i64>) -> String {
        let mut body = serde_json::json!({
            "customerId": seeded.customer_id,
            "items": [{ "productId": seeded.product_ids[0], "quantity": quantity }],
            "paymentData": [{ "amount": 5.0 * quantity as f64, "paymentMethodId": seeded.payment_method_ids[1] }]
        });
        if let Some(id) = pdv_sale_id {
            body["pdvSaleId"] = id.into();
        }
        body.to_string()
    }

    #[tokio::test]
    async fn test_post_sale_created_then_already_processed() {
        let (app, db, seeded) = setup().await;

        let (status, json) = send(&app, "POST", "/sale", Some(sale_body(&seeded, 5, Some(42)))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["pdvSaleId"], 42);
        let sale_id = json["saleId"].as_i64().unwrap();

        let (status, json) = send(&app, "POST", "/sale", Some(sale_body(&seeded, 5, Some(42)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["saleId"].as_i64(), Some(sale_id));

        assert_eq!(db.sales().count().await.unwrap(), 1);
        assert_eq!(db.stock().current_stock(seeded.product_ids[0]).await.unwrap(), 13);

        let (status, json) = send(&app, "GET", &format!("/sale/{sale_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_post_sale_validation_errors() {
        let (app, _db, _) = setup().await;

        let (status, json) = send(
            &app,
            "POST",
            "/sale",
            Some(r#"{ "items": [], "paymentData": [] }"#.to_string()),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Validation failed");
        assert_eq!(json["errors"].as_array().unwrap().len(), 3);

        let (status, json) = send(&app, "POST", "/sale", Some("not json".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["errors"].is_array());
    }

    #[tokio::test]
    async fn test_post_sale_insufficient_stock_and_missing_customer() {
        let (app, db, seeded) = setup().await;

        let (status, json) = send(&app, "POST", "/sale", Some(sale_body(&seeded, 19, None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("Insufficient stock"));
        assert_eq!(db.sales().count().await.unwrap(), 0);

        let body = sale_body(&seeded, 1, None).replace(
            &format!("\"customerId\":{}", seeded.customer_id),
            "\"customerId\":555",
        );
        let (status, _) = send(&app, "POST", "/sale", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stock_endpoints() {
        let (app, _db, seeded) = setup().await;
        let product_id = seeded.product_ids[1];

        let (status, json) = send(&app, "GET", &format!("/stock/{product_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stock"], 24);

        let (status, json) = send(&app, "GET", "/stock/ean/7896064200011", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["productId"].as_i64(), Some(product_id));

        let (status, _) = send(&app, "GET", "/stock/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(&app, "GET", "/stock?page=1&perPage=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 4);
        assert_eq!(json["lastPage"], 2);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);

        let (status, _) = send(&app, "GET", "/stock?id=999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_register_entry_and_exit_rules() {
        let (app, _db, seeded) = setup().await;
        let product_id = seeded.product_ids[3];

        let (status, json) = send(
            &app,
            "POST",
            "/stock/entry",
            Some(format!(r#"{{ "productId": {product_id}, "quantity": 4, "reason": "purchase" }}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["stock"], 5);
        assert_eq!(json["movement"]["type"], "ENTRY");

        let (status, json) = send(
            &app,
            "POST",
            "/stock/entry",
            Some(format!(r#"{{ "productId": {product_id}, "quantity": 1, "type": "EXIT" }}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["errors"][0], "saleId is required");

        let (status, _) = send(
            &app,
            "POST",
            "/stock/entry",
            Some(r#"{ "productId": 999, "quantity": 1 }"#.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _db, _) = setup().await;
        let (status, json) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }
}
