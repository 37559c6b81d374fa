//! Notification consumer with idempotency guard.
//!
//! The existence of a record keyed `(order_id, kind)` is the sole
//! idempotency witness: a redelivered `order.placed` event finds the
//! record and no-ops. This is the only deduplication guard in the
//! pipeline; other consumers accept duplicates on redelivery.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::OrderEvent;
use crate::error::{Result, ShopError};
use crate::pipeline::{EventHandler, Record};

/// Notification kind for a confirmed order placement.
pub const ORDER_CONFIRMED: &str = "ORDER_CONFIRMED";

/// A stored notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub order_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub metadata: HashMap<String, String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Append/query notification document store. No transactional coupling
/// with the primary store; consistency is eventual, bridged by events.
#[derive(Default)]
pub struct NotificationStore {
    records: DashMap<(Uuid, String), NotificationRecord>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the `(order_id, kind)` notification unless it already
    /// exists. Returns whether a record was created. The entry API makes
    /// the check-then-insert atomic, so two concurrent redeliveries still
    /// produce exactly one record.
    pub fn ensure_notification(
        &self,
        buyer_id: Uuid,
        order_id: Uuid,
        kind: &str,
        title: &str,
        body: &str,
        metadata: HashMap<String, String>,
    ) -> bool {
        match self.records.entry((order_id, kind.to_string())) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(%order_id, kind, "duplicate notification suppressed");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(NotificationRecord {
                    id: Uuid::new_v4(),
                    buyer_id,
                    order_id,
                    kind: kind.to_string(),
                    title: title.to_string(),
                    body: body.to_string(),
                    metadata,
                    is_read: false,
                    created_at: Utc::now(),
                });
                info!(%buyer_id, %order_id, kind, "notification stored");
                true
            }
        }
    }

    pub fn exists(&self, order_id: Uuid, kind: &str) -> bool {
        self.records.contains_key(&(order_id, kind.to_string()))
    }

    /// Buyer's notifications, newest first.
    pub fn for_buyer(&self, buyer_id: Uuid) -> Vec<NotificationRecord> {
        let mut records: Vec<NotificationRecord> = self
            .records
            .iter()
            .filter(|entry| entry.buyer_id == buyer_id)
            .map(|entry| entry.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn mark_read(&self, buyer_id: Uuid, notification_id: Uuid) -> Result<()> {
        for mut entry in self.records.iter_mut() {
            if entry.id == notification_id {
                if entry.buyer_id != buyer_id {
                    return Err(ShopError::UnauthorizedAccess {
                        resource: "notification",
                    });
                }
                entry.is_read = true;
                return Ok(());
            }
        }
        Err(ShopError::not_found("Notification", notification_id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `order.placed` consumer (group `notification-service`).
pub struct NotificationConsumer {
    store: std::sync::Arc<NotificationStore>,
}

impl NotificationConsumer {
    pub fn new(store: std::sync::Arc<NotificationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for NotificationConsumer {
    async fn handle(&self, record: &Record) -> Result<()> {
        let event: OrderEvent = record.payload_as()?;
        debug!(order_id = %event.order_id, "notification consumer received order event");

        let mut metadata = HashMap::new();
        metadata.insert("orderId".to_string(), event.order_id.to_string());
        metadata.insert("eventId".to_string(), event.event_id.clone());

        self.store.ensure_notification(
            event.buyer_id,
            event.order_id,
            ORDER_CONFIRMED,
            "Order Confirmed",
            &format!(
                "Your order has been successfully placed. Total: ${}",
                event.total_amount
            ),
            metadata,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_notification_is_idempotent() {
        let store = NotificationStore::new();
        let buyer = Uuid::new_v4();
        let order = Uuid::new_v4();

        assert!(store.ensure_notification(buyer, order, ORDER_CONFIRMED, "t", "b", HashMap::new()));
        assert!(!store.ensure_notification(buyer, order, ORDER_CONFIRMED, "t", "b", HashMap::new()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn different_kinds_are_separate_records() {
        let store = NotificationStore::new();
        let buyer = Uuid::new_v4();
        let order = Uuid::new_v4();

        assert!(store.ensure_notification(buyer, order, ORDER_CONFIRMED, "t", "b", HashMap::new()));
        assert!(store.ensure_notification(buyer, order, "ORDER_SHIPPED", "t", "b", HashMap::new()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn mark_read_enforces_ownership() {
        let store = NotificationStore::new();
        let buyer = Uuid::new_v4();
        let order = Uuid::new_v4();
        store.ensure_notification(buyer, order, ORDER_CONFIRMED, "t", "b", HashMap::new());
        let id = store.for_buyer(buyer)[0].id;

        let err = store.mark_read(Uuid::new_v4(), id).unwrap_err();
        assert!(matches!(err, ShopError::UnauthorizedAccess { .. }));

        store.mark_read(buyer, id).unwrap();
        assert!(store.for_buyer(buyer)[0].is_read);
    }
}
