//! # Validation Rules
//!
//! Shape checks that run before any database access.
//!
//! ```text
//! SaleRequest ──► collect_sale_request_errors ──► [] ──► plan / persist
//!                                  │
//!                                  └──► [e1, e2, ...] ──► 400 / dead letter
//! ```

use crate::error::ValidationError;
use crate::payload::SaleRequest;
use crate::types::{MovementReason, MovementType, NewStockMovement};
use crate::MAX_SALE_LINES;

/// Returns every problem found in the request, in field order.
pub fn collect_sale_request_errors(request: &SaleRequest) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match request.customer_id {
        None => errors.push(ValidationError::required("customerId")),
        Some(id) if id <= 0 => errors.push(ValidationError::must_be_positive("customerId")),
        Some(_) => {}
    }

    if request.items.is_empty() {
        errors.push(ValidationError::Empty {
            field: "items".to_string(),
        });
    } else if request.items.len() > MAX_SALE_LINES {
        errors.push(ValidationError::TooLarge {
            field: "items".to_string(),
            max: MAX_SALE_LINES as i64,
        });
    }

    for (index, item) in request.items.iter().enumerate() {
        if item.product_id <= 0 {
            errors.push(ValidationError::must_be_positive(format!("items[{index}].productId")));
        }
        if item.quantity <= 0 {
            errors.push(ValidationError::must_be_positive(format!("items[{index}].quantity")));
        }
    }

    if request.payment_data.is_empty() {
        errors.push(ValidationError::Empty {
            field: "paymentData".to_string(),
        });
    } else if request.payment_data.len() > MAX_SALE_LINES {
        errors.push(ValidationError::TooLarge {
            field: "paymentData".to_string(),
            max: MAX_SALE_LINES as i64,
        });
    }

    for (index, payment) in request.payment_data.iter().enumerate() {
        if !payment.amount.is_positive() {
            errors.push(ValidationError::must_be_positive(format!("paymentData[{index}].amount")));
        }
        if payment.payment_method_id <= 0 {
            errors.push(ValidationError::must_be_positive(format!(
                "paymentData[{index}].paymentMethodId"
            )));
        }
    }

    if matches!(request.pdv_sale_id, Some(id) if id <= 0) {
        errors.push(ValidationError::must_be_positive("pdvSaleId"));
    }

    errors
}

/// Validates a sale request, returning the first problem found.
pub fn validate_sale_request(request: &SaleRequest) -> Result<(), ValidationError> {
    match collect_sale_request_errors(request).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validates a ledger movement before it is appended.
///
/// Product existence and available stock need the database and are checked
/// by the ledger itself.
pub fn validate_movement(movement: &NewStockMovement) -> Result<(), ValidationError> {
    if movement.product_id <= 0 {
        return Err(ValidationError::must_be_positive("productId"));
    }

    if movement.quantity <= 0 {
        return Err(ValidationError::must_be_positive("quantity"));
    }

    if movement.movement_type == MovementType::Exit
        && movement.reason == MovementReason::Sale
        && movement.sale_id.is_none()
    {
        return Err(ValidationError::required("saleId"));
    }

    if movement.reason == MovementReason::Sale && movement.movement_type == MovementType::Entry {
        return Err(ValidationError::InvalidFormat {
            field: "type".to_string(),
            reason: "a sale can only take stock out".to_string(),
        });
    }

    if let MovementReason::Other(reason) = &movement.reason {
        if reason.trim().is_empty() {
            return Err(ValidationError::required("reason"));
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
