use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A catalog product.
///
/// `stock_quantity` is the only cross-request shared mutable state in the
/// system; every mutation goes through the stock guard's conditional write
/// against `version`. The unsigned type keeps the stock >= 0 invariant at
/// the type level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub price: Decimal,
    pub stock_quantity: u32,
    /// Monotonically incrementing stamp for optimistic concurrency.
    /// Bumped on every stock write; a conditional write observing a stale
    /// value matches zero rows.
    pub version: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, price: Decimal, stock: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sku: sku.into(),
            name: name.into(),
            price,
            stock_quantity: stock,
            version: 0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_stock(&self, requested: u32) -> bool {
        self.stock_quantity >= requested
    }
}
