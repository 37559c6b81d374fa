//! `inventory.updated` consumer (group `inventory-sync-service`).
//!
//! Logs stock changes for downstream search/index synchronization. The
//! index itself is an external collaborator; this consumer is the hook.

use async_trait::async_trait;
use tracing::info;

use crate::domain::InventoryEvent;
use crate::error::Result;
use crate::pipeline::{EventHandler, Record};

#[derive(Default)]
pub struct InventorySyncConsumer;

impl InventorySyncConsumer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for InventorySyncConsumer {
    async fn handle(&self, record: &Record) -> Result<()> {
        let event: InventoryEvent = record.payload_as()?;
        info!(
            product_id = %event.product_id,
            old = event.old_quantity,
            new = event.new_quantity,
            reason = ?event.reason,
            "inventory change observed"
        );
        Ok(())
    }
}
