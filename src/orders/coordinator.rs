//! Order placement.
//!
//! Placement turns a cart into an order in one atomic commit: every line's
//! stock deduction (each predicated on the product version observed during
//! validation), the order insert and the cart clear succeed or fail
//! together. A concurrent writer invalidating any single line's version
//! aborts the whole placement with nothing persisted.
//!
//! Events go out only after the commit has succeeded: the durable state
//! change is the source of truth, the events describe it. Non-critical
//! fan-out (notification dispatch, activity trail) runs on background
//! pools so a slow consumer never stretches placement latency.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::events::{topics, ActivityEvent, InventoryEvent, OrderEvent, StockChangeReason};
use crate::domain::{Order, OrderItem, RequestContext};
use crate::error::{Result, ShopError};
use crate::inventory::StockGuard;
use crate::pipeline::EventLog;
use crate::store::Store;
use crate::workers::TaskPool;

pub struct OrderPlacementCoordinator {
    store: Arc<dyn Store>,
    guard: StockGuard,
    log: Arc<EventLog>,
    general_pool: Arc<TaskPool>,
    analytics_pool: Arc<TaskPool>,
}

impl OrderPlacementCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        guard: StockGuard,
        log: Arc<EventLog>,
        general_pool: Arc<TaskPool>,
        analytics_pool: Arc<TaskPool>,
    ) -> Self {
        Self {
            store,
            guard,
            log,
            general_pool,
            analytics_pool,
        }
    }

    /// Place an order from the caller's cart.
    ///
    /// Validation reads each product once, snapshots its price into the
    /// order line and prepares a version-predicated deduction; the commit
    /// then applies all deductions, the order insert and the cart clear as
    /// one unit. `StockConflict` means a concurrent writer won a race on
    /// some line; the caller decides whether to re-submit.
    #[instrument(skip(self, ctx, shipping_address), fields(buyer_id = %ctx.buyer_id))]
    pub async fn place_order(
        &self,
        ctx: &RequestContext,
        shipping_address: HashMap<String, String>,
    ) -> Result<Order> {
        let cart = self
            .store
            .get_cart(ctx.buyer_id)
            .await?
            .ok_or(ShopError::EmptyCart)?;
        if cart.is_empty() {
            return Err(ShopError::EmptyCart);
        }

        let mut items = Vec::with_capacity(cart.items.len());
        let mut deductions = Vec::with_capacity(cart.items.len());
        let mut stock_before = Vec::with_capacity(cart.items.len());

        for line in &cart.items {
            let product = self.store.get_product(line.product_id).await?;
            if !product.active {
                return Err(ShopError::ProductInactive {
                    product_id: product.id,
                });
            }
            // Price is snapshotted here; later catalog edits do not touch
            // this order.
            items.push(OrderItem::new(product.id, line.quantity, product.price));
            deductions.push(self.guard.prepare_deduction(&product, line.quantity)?);
            stock_before.push((product.id, product.stock_quantity, line.quantity));
        }

        let order = Order::new(ctx.buyer_id, shipping_address, items);
        self.store.commit_placement(&order, &deductions).await?;

        info!(
            order_id = %order.id,
            total = %order.total_amount,
            lines = order.items.len(),
            "order placed"
        );

        self.publish_placement_events(&order, &stock_before);
        self.dispatch_background_fanout(&order).await;

        Ok(order)
    }

    /// Critical-path events, published synchronously after the commit. A
    /// publication failure is logged, never unwound into the already
    /// committed placement.
    fn publish_placement_events(&self, order: &Order, stock_before: &[(Uuid, u32, u32)]) {
        let event = OrderEvent::new(order.id, order.buyer_id, order.total_amount, order.status);
        if let Err(e) = self
            .log
            .publish(topics::ORDER_PLACED, &order.buyer_id.to_string(), &event)
        {
            warn!(order_id = %order.id, error = %e, "failed to publish order.placed");
        }

        for &(product_id, before, quantity) in stock_before {
            let event = InventoryEvent::new(
                product_id,
                before,
                before - quantity,
                StockChangeReason::OrderPlaced,
            );
            if let Err(e) =
                self.log
                    .publish(topics::INVENTORY_UPDATED, &product_id.to_string(), &event)
            {
                warn!(%product_id, error = %e, "failed to publish inventory.updated");
            }
        }
    }

    /// Best-effort fan-out handed to the background pools. Under load the
    /// submitting request runs these inline (throttled, not dropped).
    async fn dispatch_background_fanout(&self, order: &Order) {
        let log = self.log.clone();
        let dispatch = json!({
            "order_id": order.id,
            "buyer_id": order.buyer_id,
            "total_amount": order.total_amount,
        });
        let buyer_key = order.buyer_id.to_string();
        self.general_pool
            .execute(async move {
                if let Err(e) = log.publish(topics::NOTIFICATION_DISPATCH, &buyer_key, &dispatch) {
                    warn!(error = %e, "failed to publish notification.dispatch");
                }
            })
            .await;

        let log = self.log.clone();
        let activity = ActivityEvent::new(
            order.buyer_id,
            "ORDER_PLACED",
            json!({ "order_id": order.id, "total_amount": order.total_amount }),
        );
        let buyer_key = order.buyer_id.to_string();
        self.analytics_pool
            .execute(async move {
                if let Err(e) = log.publish(topics::USER_ACTIVITY, &buyer_key, &activity) {
                    warn!(error = %e, "failed to publish user.activity");
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Cart, Product};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        coordinator: OrderPlacementCoordinator,
        store: Arc<MemoryStore>,
        log: Arc<EventLog>,
    }

    fn fixture() -> Fixture {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let log = Arc::new(EventLog::new(3));
        let guard = StockGuard::new(store.clone(), log.clone());
        let coordinator = OrderPlacementCoordinator::new(
            store.clone(),
            guard,
            log.clone(),
            Arc::new(TaskPool::new("general", 2, 16)),
            Arc::new(TaskPool::new("analytics", 2, 16)),
        );
        Fixture {
            coordinator,
            store,
            log,
        }
    }

    async fn seed_product(store: &MemoryStore, price: &str, stock: u32) -> Uuid {
        let product = Product::new("SKU-1", "Widget", price.parse().unwrap(), stock);
        let id = product.id;
        store.insert_product(product).await.unwrap();
        id
    }

    async fn seed_cart(store: &MemoryStore, buyer: Uuid, product: Uuid, quantity: u32) {
        let mut cart = Cart::new(buyer);
        cart.add_item(product, quantity);
        store.put_cart(cart).await.unwrap();
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let f = fixture();
        let ctx = RequestContext::customer(Uuid::new_v4());
        let err = f
            .coordinator
            .place_order(&ctx, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::EmptyCart));
    }

    #[tokio::test]
    async fn placement_snapshots_price_and_clears_cart() {
        let f = fixture();
        let buyer = Uuid::new_v4();
        let product_id = seed_product(&f.store, "19.99", 10).await;
        seed_cart(&f.store, buyer, product_id, 2).await;

        let ctx = RequestContext::customer(buyer);
        let order = f
            .coordinator
            .place_order(&ctx, HashMap::new())
            .await
            .unwrap();

        assert_eq!(order.total_amount, dec!(39.98));
        assert_eq!(order.items[0].unit_price, dec!(19.99));
        assert!(order.total_is_consistent());
        assert!(f.store.get_cart(buyer).await.unwrap().is_none());
        assert_eq!(f.store.get_product(product_id).await.unwrap().stock_quantity, 8);

        // Mutate the catalog price after the fact; the order is untouched.
        let mut product = f.store.get_product(product_id).await.unwrap();
        product.price = dec!(99.00);
        f.store.insert_product(product).await.unwrap();
        let reread = f.store.get_order(order.id).await.unwrap();
        assert_eq!(reread.items[0].unit_price, dec!(19.99));
    }

    #[tokio::test]
    async fn inactive_product_aborts_placement() {
        let f = fixture();
        let buyer = Uuid::new_v4();
        let mut product = Product::new("SKU-X", "Retired", dec!(5.00), 10);
        product.active = false;
        let product_id = product.id;
        f.store.insert_product(product).await.unwrap();
        seed_cart(&f.store, buyer, product_id, 1).await;

        let err = f
            .coordinator
            .place_order(&RequestContext::customer(buyer), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::ProductInactive { .. }));
        // Nothing persisted.
        assert_eq!(f.store.get_product(product_id).await.unwrap().stock_quantity, 10);
        assert!(f.store.get_cart(buyer).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn placement_publishes_order_and_inventory_events() {
        let f = fixture();
        let buyer = Uuid::new_v4();
        let product_id = seed_product(&f.store, "3.00", 5).await;
        seed_cart(&f.store, buyer, product_id, 2).await;

        let order = f
            .coordinator
            .place_order(&RequestContext::customer(buyer), HashMap::new())
            .await
            .unwrap();

        let placed = f.log.records(topics::ORDER_PLACED);
        assert_eq!(placed.len(), 1);
        let event: OrderEvent = placed[0].payload_as().unwrap();
        assert_eq!(event.order_id, order.id);
        assert_eq!(placed[0].key, buyer.to_string());

        let inventory = f.log.records(topics::INVENTORY_UPDATED);
        assert_eq!(inventory.len(), 1);
        let event: InventoryEvent = inventory[0].payload_as().unwrap();
        assert_eq!(event.old_quantity, 5);
        assert_eq!(event.new_quantity, 3);
    }
}
