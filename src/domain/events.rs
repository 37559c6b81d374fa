use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderStatus;

/// Topic names, kept in one place so a producer/consumer typo cannot route
/// messages into the void.
pub mod topics {
    /// Published when a buyer places an order. Key = buyer id.
    pub const ORDER_PLACED: &str = "order.placed";
    /// Published when order status changes. Key = order id.
    pub const ORDER_STATUS_UPDATED: &str = "order.status.updated";
    /// Published when product stock changes. Key = product id.
    pub const INVENTORY_UPDATED: &str = "inventory.updated";
    /// Published for buyer actions (placement attempts, cancellations). Key = buyer id.
    pub const USER_ACTIVITY: &str = "user.activity";
    /// Published to trigger notification delivery. Key = buyer id.
    pub const NOTIFICATION_DISPATCH: &str = "notification.dispatch";
    /// Terminal sink for records that exhausted their retry budget.
    pub const DEAD_LETTER: &str = "myshop.dlt";
}

/// Domain event emitted on order placement and status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Dedup token for idempotent consumers
    pub event_id: String,
    pub order_id: Uuid,
    pub buyer_id: Uuid,
    pub total_amount: Decimal,
    pub status: OrderStatus,
}

impl OrderEvent {
    pub fn new(order_id: Uuid, buyer_id: Uuid, total_amount: Decimal, status: OrderStatus) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            order_id,
            buyer_id,
            total_amount,
            status,
        }
    }
}

/// Why a stock level changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockChangeReason {
    OrderPlaced,
    OrderCancelled,
    StockCorrection,
}

/// Domain event emitted whenever product stock changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEvent {
    pub event_id: String,
    pub product_id: Uuid,
    pub old_quantity: u32,
    pub new_quantity: u32,
    pub reason: StockChangeReason,
}

impl InventoryEvent {
    pub fn new(
        product_id: Uuid,
        old_quantity: u32,
        new_quantity: u32,
        reason: StockChangeReason,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            product_id,
            old_quantity,
            new_quantity,
            reason,
        }
    }
}

/// Best-effort activity trail record; consumed with no dedup, duplicates
/// on redelivery are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub event_id: String,
    pub buyer_id: Uuid,
    pub action: String,
    pub detail: serde_json::Value,
}

impl ActivityEvent {
    pub fn new(buyer_id: Uuid, action: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            buyer_id,
            action: action.into(),
            detail,
        }
    }
}
