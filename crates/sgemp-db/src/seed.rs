//! # Default Data
//!
//! The rows a fresh installation needs before the first sale: the
//! payment methods, the walk-in customer, and a small starter catalog
//! whose opening stock is recorded as `initial_stock` ledger entries.
//!
//! Used by the `seed` binary and by tests across the workspace.

use tracing::info;

use crate::error::ServiceResult;
use crate::pool::Database;
use sgemp_core::{Money, NewProduct};

/// Payment methods every store accepts.
pub const DEFAULT_PAYMENT_METHODS: &[&str] =
    &["Dinheiro", "Pix", "Cartão de crédito", "Cartão de débito"];

/// Customer used for anonymous counter sales.
pub const DEFAULT_CUSTOMER: &str = "Consumidor final";

/// (description, ean, price in cents, opening stock)
pub const DEFAULT_PRODUCTS: &[(&str, &str, i64, i64)] = &[
    ("Refrigerante Cola 350ml", "7894900011517", 500, 18),
    ("Água Mineral 500ml", "7896064200011", 300, 24),
    ("Café Torrado 500g", "7896005800027", 1890, 8),
    ("Azeite Extra Virgem 500ml", "5601012011500", 3990, 1),
];

/// Ids of the rows written by [`seed_defaults`].
#[derive(Debug, Clone)]
pub struct SeedReport {
    pub customer_id: i64,
    pub payment_method_ids: Vec<i64>,
    /// Same order as [`DEFAULT_PRODUCTS`].
    pub product_ids: Vec<i64>,
}

/// Writes the default rows. Returns `None` when products already exist.
pub async fn seed_defaults(db: &Database) -> ServiceResult<Option<SeedReport>> {
    let existing = db.products().count().await?;
    if existing > 0 {
        info!(existing, "Catalog not empty, skipping seed");
        return Ok(None);
    }

    let mut payment_method_ids = Vec::with_capacity(DEFAULT_PAYMENT_METHODS.len());
    for description in DEFAULT_PAYMENT_METHODS {
        payment_method_ids.push(db.payment_methods().insert(description).await?.id);
    }

    let customer_id = db.customers().insert(DEFAULT_CUSTOMER).await?.id;

    let mut product_ids = Vec::with_capacity(DEFAULT_PRODUCTS.len());
    for &(description, ean, price_cents, stock) in DEFAULT_PRODUCTS {
        let product = db
            .products()
            .create_with_stock(
                &NewProduct {
                    description: description.to_string(),
                    ean: Some(ean.to_string()),
                    price: Money::from_cents(price_cents),
                },
                stock,
            )
            .await?;
        product_ids.push(product.id);
    }

    info!(
        products = product_ids.len(),
        payment_methods = payment_method_ids.len(),
        "Seeded default data"
    );

    Ok(Some(SeedReport {
        customer_id,
        payment_method_ids,
        product_ids,
    }))
}
