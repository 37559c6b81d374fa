//! Analytics and activity-trail consumers.
//!
//! Deliberately no dedup here: a redelivered event legitimately produces a
//! duplicate record. That is an accepted trade-off for a best-effort
//! analytics trail, not a bug.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ActivityEvent, OrderEvent};
use crate::error::Result;
use crate::pipeline::{EventHandler, Record};

/// One analytics document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub id: Uuid,
    pub event_type: String,
    pub buyer_id: Uuid,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only analytics document store.
#[derive(Default)]
pub struct AnalyticsStore {
    records: RwLock<Vec<AnalyticsRecord>>,
}

impl AnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event_type: &str, buyer_id: Uuid, data: serde_json::Value) {
        let mut records = self.records.write().expect("analytics lock poisoned");
        records.push(AnalyticsRecord {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            buyer_id,
            data,
            created_at: Utc::now(),
        });
    }

    pub fn records(&self) -> Vec<AnalyticsRecord> {
        self.records.read().expect("analytics lock poisoned").clone()
    }

    pub fn count_by_type(&self, event_type: &str) -> usize {
        self.records
            .read()
            .expect("analytics lock poisoned")
            .iter()
            .filter(|r| r.event_type == event_type)
            .count()
    }
}

/// `order.placed` consumer (group `analytics-service`).
pub struct AnalyticsConsumer {
    store: Arc<AnalyticsStore>,
}

impl AnalyticsConsumer {
    pub fn new(store: Arc<AnalyticsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for AnalyticsConsumer {
    async fn handle(&self, record: &Record) -> Result<()> {
        let event: OrderEvent = record.payload_as()?;
        debug!(order_id = %event.order_id, "analytics consumer received order event");

        self.store.append(
            "ORDER_PLACED",
            event.buyer_id,
            serde_json::json!({
                "orderId": event.order_id.to_string(),
                "amount": event.total_amount,
            }),
        );
        Ok(())
    }
}

/// `user.activity` consumer (group `activity-log-service`).
pub struct ActivityLogConsumer {
    store: Arc<AnalyticsStore>,
}

impl ActivityLogConsumer {
    pub fn new(store: Arc<AnalyticsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for ActivityLogConsumer {
    async fn handle(&self, record: &Record) -> Result<()> {
        let event: ActivityEvent = record.payload_as()?;
        self.store.append(
            "USER_ACTIVITY",
            event.buyer_id,
            serde_json::json!({
                "action": event.action,
                "detail": event.detail,
            }),
        );
        Ok(())
    }
}
