//! Stock concurrency guard.
//!
//! Every stock mutation in the system funnels through here. The write path
//! is optimistic: read the product's stock and version, then issue one
//! conditional write predicated on that version. The losing side of a race
//! gets `StockConflict` surfaced, not hidden: retrying silently would
//! re-apply stale business checks without the caller's knowledge.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::events::{topics, InventoryEvent, StockChangeReason};
use crate::domain::Product;
use crate::error::{Result, ShopError};
use crate::pipeline::EventLog;
use crate::store::{StockDeduction, Store};

use super::LockManager;

/// A signed stock adjustment applied by `correct_stock_levels`.
#[derive(Debug, Clone)]
pub struct StockCorrection {
    pub product_id: Uuid,
    /// Positive adds stock, negative removes it.
    pub delta: i64,
}

/// Version-checked stock mutation primitive.
#[derive(Clone)]
pub struct StockGuard {
    store: Arc<dyn Store>,
    log: Arc<EventLog>,
}

impl StockGuard {
    pub fn new(store: Arc<dyn Store>, log: Arc<EventLog>) -> Self {
        Self { store, log }
    }

    /// Validate a line against the product observed right now and produce
    /// a conditional-write intent for the placement commit. No state is
    /// touched; the intent's version predicate is what makes the eventual
    /// commit safe.
    pub fn prepare_deduction(&self, product: &Product, quantity: u32) -> Result<StockDeduction> {
        if !product.has_stock(quantity) {
            return Err(ShopError::InsufficientStock {
                product_id: product.id,
                requested: quantity,
                available: product.stock_quantity,
            });
        }
        Ok(StockDeduction {
            product_id: product.id,
            quantity,
            expected_version: product.version,
        })
    }

    /// Deduct stock from a single product in one conditional write.
    /// Returns the new version; a concurrent writer winning the race
    /// surfaces as `StockConflict` with no retry.
    #[instrument(skip(self))]
    pub async fn deduct(
        &self,
        product_id: Uuid,
        quantity: u32,
        reason: StockChangeReason,
    ) -> Result<u64> {
        let product = self.store.get_product(product_id).await?;
        let deduction = self.prepare_deduction(&product, quantity)?;
        let new_version = self
            .store
            .deduct_stock(product_id, quantity, deduction.expected_version)
            .await?;

        self.publish_change(
            product_id,
            product.stock_quantity,
            product.stock_quantity - quantity,
            reason,
        );
        info!(%product_id, quantity, new_version, "stock deducted");
        Ok(new_version)
    }

    /// Restore stock to a single product. Unconditional increment, since
    /// the compensation path must not lose to a version race; the version
    /// stamp still advances.
    #[instrument(skip(self))]
    pub async fn restore(
        &self,
        product_id: Uuid,
        quantity: u32,
        reason: StockChangeReason,
    ) -> Result<u64> {
        let before = self.store.get_product(product_id).await?.stock_quantity;
        let new_version = self.store.restore_stock(product_id, quantity).await?;

        self.publish_change(product_id, before, before + quantity, reason);
        info!(%product_id, quantity, new_version, "stock restored");
        Ok(new_version)
    }

    /// Publish the stock change downstream. The write has already
    /// committed; a publication failure is logged, never propagated back
    /// into the stock operation.
    fn publish_change(&self, product_id: Uuid, old: u32, new: u32, reason: StockChangeReason) {
        let event = InventoryEvent::new(product_id, old, new, reason);
        if let Err(e) = self
            .log
            .publish(topics::INVENTORY_UPDATED, &product_id.to_string(), &event)
        {
            warn!(%product_id, error = %e, "failed to publish inventory event");
        }
    }

    /// Apply a batch of stock corrections under a named lease.
    ///
    /// Multi-item corrections span several rows and several steps, which a
    /// single-row version predicate cannot cover, so they serialize behind
    /// the `inventory:correction` lock.
    #[instrument(skip(self, locks, corrections), fields(count = corrections.len()))]
    pub async fn correct_stock_levels(
        &self,
        locks: &LockManager,
        corrections: &[StockCorrection],
        wait_timeout: Duration,
        lease_timeout: Duration,
    ) -> Result<()> {
        locks
            .with_lock("inventory:correction", wait_timeout, lease_timeout, || async {
                for correction in corrections {
                    if correction.delta >= 0 {
                        self.restore(
                            correction.product_id,
                            correction.delta as u32,
                            StockChangeReason::StockCorrection,
                        )
                        .await?;
                    } else {
                        self.deduct(
                            correction.product_id,
                            correction.delta.unsigned_abs() as u32,
                            StockChangeReason::StockCorrection,
                        )
                        .await?;
                    }
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    async fn setup(stock: u32) -> (StockGuard, Arc<MemoryStore>, Arc<EventLog>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let log = Arc::new(EventLog::new(3));
        let product = Product::new("SKU-G", "Guarded", dec!(5.00), stock);
        let id = product.id;
        store.insert_product(product).await.unwrap();
        (StockGuard::new(store.clone(), log.clone()), store, log, id)
    }

    #[tokio::test]
    async fn deduct_publishes_inventory_event() {
        let (guard, _store, log, id) = setup(10).await;
        guard
            .deduct(id, 4, StockChangeReason::OrderPlaced)
            .await
            .unwrap();

        let records = log.records(topics::INVENTORY_UPDATED);
        assert_eq!(records.len(), 1);
        let event: InventoryEvent = records[0].payload_as().unwrap();
        assert_eq!(event.old_quantity, 10);
        assert_eq!(event.new_quantity, 6);
        assert_eq!(event.reason, StockChangeReason::OrderPlaced);
    }

    #[tokio::test]
    async fn losing_writer_sees_conflict_not_retry() {
        let (guard, store, _log, id) = setup(5).await;

        // Simulate a racing writer committing between read and write.
        let product = store.get_product(id).await.unwrap();
        store
            .deduct_stock(id, 1, product.version)
            .await
            .unwrap();

        let deduction = guard.prepare_deduction(&product, 1).unwrap();
        let err = store
            .deduct_stock(id, deduction.quantity, deduction.expected_version)
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::StockConflict));
    }

    #[tokio::test]
    async fn correction_batch_applies_both_directions() {
        let (guard, store, _log, id) = setup(10).await;
        let locks = LockManager::new();

        guard
            .correct_stock_levels(
                &locks,
                &[
                    StockCorrection { product_id: id, delta: -3 },
                    StockCorrection { product_id: id, delta: 1 },
                ],
                Duration::from_millis(100),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(store.get_product(id).await.unwrap().stock_quantity, 8);
    }
}
