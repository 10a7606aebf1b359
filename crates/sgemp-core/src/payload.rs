//! # Finalized-Sale Payload
//!
//! The message the PDV publishes to the `finalized_sale` queue. The same
//! document is the body of `POST /sale`.
//!
//! ```text
//! {
//!   "customerId": 1,
//!   "items":       [ { "productId": 1, "quantity": 2 } ],
//!   "paymentData": [ { "amount": 13.00, "paymentMethodId": 1, "details": "..." } ],
//!   "pdvSaleId":   42
//! }
//! ```
//!
//! Missing numeric fields decode as `0` / `None` so that validation can name
//! the offending field instead of failing the whole decode.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::{self, Money};

/// One requested line: a product and how many units of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleLine {
    #[serde(default)]
    pub product_id: i64,
    #[serde(default)]
    pub quantity: i64,
}

/// One payment towards the sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLine {
    #[serde(default, with = "money::decimal")]
    pub amount: Money,
    #[serde(default)]
    pub payment_method_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A finalized sale as received from the PDV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub items: Vec<SaleLine>,
    #[serde(default, rename = "paymentData")]
    pub payment_data: Vec<PaymentLine>,
    /// Idempotency key. Absent for sales entered directly in the back office.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdv_sale_id: Option<i64>,
}

impl SaleRequest {
    /// Decodes a queue message body.
    ///
    /// Anything that is not a JSON object of the expected shape is reported
    /// as `InvalidFormat` on the `payload` field.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(bytes).map_err(|e| ValidationError::InvalidFormat {
            field: "payload".to_string(),
            reason: e.to_string(),
        })
    }

    /// Encodes the request as a queue message body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Copy of this request carrying the given idempotency key.
    ///
    /// Used by the PDV to publish a sale it has just committed locally.
    pub fn with_pdv_sale_id(&self, pdv_sale_id: i64) -> Self {
        SaleRequest {
            pdv_sale_id: Some(pdv_sale_id),
            ..self.clone()
        }
    }

    /// Sum of the declared payment amounts.
    pub fn payments_total(&self) -> Money {
        self.payment_data.iter().map(|p| p.amount).sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
