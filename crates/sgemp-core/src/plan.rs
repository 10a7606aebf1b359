//! # Sale Aggregate Builder
//!
//! Turns a validated [`SaleRequest`] plus catalog data into the rows the
//! orchestrator writes.
//!
//! ## Assembly
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  SaleRequest.items ──┐                                                  │
//! │                      ├──► PlannedItem { qty, unit_price ❄, value }      │
//! │  PriceCatalog ───────┘            │                                     │
//! │  (one batched lookup)             ├──► total = Σ value                  │
//! │                                   └──► requested[product] = Σ qty       │
//! │                                                                         │
//! │  SaleRequest.paymentData ──┐                                            │
//! │                            ├──► PlannedPayment { method, amount }       │
//! │  known payment methods ────┘                                            │
//! │                                                                         │
//! │  Unknown product / method ──► ValidationError::UnknownReference         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::ValidationError;
use crate::money::Money;
use crate::payload::SaleRequest;
use crate::validation::validate_sale_request;

/// Unit prices keyed by product id.
pub type PriceCatalog = HashMap<i64, Money>;

/// A priced line ready to be inserted once the sale id is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem {
    pub product_id: i64,
    pub quantity: i64,
    /// Catalog price at planning time.
    pub unit_price: Money,
    /// quantity × unit_price.
    pub value: Money,
}

/// A payment ready to be inserted once the sale id is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPayment {
    pub payment_method_id: i64,
    pub amount: Money,
    pub details: Option<String>,
}

/// Everything the orchestrator needs to persist one sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalePlan {
    pub customer_id: i64,
    pub pdv_sale_id: Option<i64>,
    pub items: Vec<PlannedItem>,
    pub payments: Vec<PlannedPayment>,
    pub total: Money,
    requested: BTreeMap<i64, i64>,
}

impl SalePlan {
    /// Total quantity requested per distinct product, ordered by product id.
    ///
    /// Stock is checked against these sums so that two lines for the same
    /// product cannot each pass on their own and overdraw together.
    pub fn requested_by_product(&self) -> &BTreeMap<i64, i64> {
        &self.requested
    }
}

/// Distinct product ids referenced by the request, sorted.
pub fn product_ids(request: &SaleRequest) -> Vec<i64> {
    request
        .items
        .iter()
        .map(|item| item.product_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct payment method ids referenced by the request, sorted.
pub fn payment_method_ids(request: &SaleRequest) -> Vec<i64> {
    request
        .payment_data
        .iter()
        .map(|payment| payment.payment_method_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Prices every line and assembles the persistence plan.
///
/// `prices` must come from a single batched lookup of [`product_ids`];
/// `payment_methods` from one of [`payment_method_ids`].
pub fn build_sale_plan(
    request: &SaleRequest,
    prices: &PriceCatalog,
    payment_methods: &HashSet<i64>,
) -> Result<SalePlan, ValidationError> {
    validate_sale_request(request)?;

    let customer_id = request
        .customer_id
        .ok_or_else(|| ValidationError::required("customerId"))?;

    let mut items = Vec::with_capacity(request.items.len());
    let mut requested: BTreeMap<i64, i64> = BTreeMap::new();
    let mut total = Money::zero();

    for line in &request.items {
        let unit_price = *prices
            .get(&line.product_id)
            .ok_or_else(|| ValidationError::unknown("productId", line.product_id))?;

        let value = unit_price
            .checked_multiply_quantity(line.quantity)
            .ok_or_else(|| overflow("items"))?;
        total = total.checked_add(value).ok_or_else(|| overflow("total"))?;

        let entry = requested.entry(line.product_id).or_insert(0);
        *entry = entry
            .checked_add(line.quantity)
            .ok_or_else(|| overflow("quantity"))?;

        items.push(PlannedItem {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price,
            value,
        });
    }

    let mut payments = Vec::with_capacity(request.payment_data.len());
    for payment in &request.payment_data {
        if !payment_methods.contains(&payment.payment_method_id) {
            return Err(ValidationError::unknown(
                "paymentMethodId",
                payment.payment_method_id,
            ));
        }

        payments.push(PlannedPayment {
            payment_method_id: payment.payment_method_id,
            amount: payment.amount,
            details: payment.details.clone(),
        });
    }

    Ok(SalePlan {
        customer_id,
        pdv_sale_id: request.pdv_sale_id,
        items,
        payments,
        total,
        requested,
    })
}

fn overflow(field: &str) -> ValidationError {
    ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "value out of range".to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
