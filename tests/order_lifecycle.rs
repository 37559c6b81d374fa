//! Payment, cancellation and fulfilment through the engine facade.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use uuid::Uuid;

use myshop_core::domain::{Order, OrderStatus, PaymentStatus, Product, RequestContext};
use myshop_core::orders::{PaymentGateway, PaymentOutcome};
use myshop_core::store::MemoryStore;
use myshop_core::{AppConfig, OrderEngine, ShopError};

/// Deterministic gateway for lifecycle tests.
struct StaticGateway {
    approve: bool,
}

#[async_trait]
impl PaymentGateway for StaticGateway {
    async fn charge(&self, _order: &Order) -> myshop_core::Result<PaymentOutcome> {
        Ok(PaymentOutcome {
            approved: self.approve,
            reference: self.approve.then(|| "TXN-STATIC".to_string()),
        })
    }
}

fn engine(approve: bool) -> OrderEngine {
    OrderEngine::new(
        AppConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(StaticGateway { approve }),
    )
}

async fn place(engine: &OrderEngine, ctx: &RequestContext, stock: u32, quantity: u32) -> (Uuid, Order) {
    let admin = RequestContext::admin(Uuid::new_v4());
    let product = Product::new("SKU-LC", "Chair", dec!(40.00), stock);
    let product_id = product.id;
    engine.add_product(&admin, product).await.unwrap();
    engine.add_to_cart(ctx, product_id, quantity).await.unwrap();
    let order = engine.place_order(ctx, HashMap::new()).await.unwrap();
    (product_id, order)
}

#[tokio::test]
async fn paid_order_flows_through_fulfilment() {
    let engine = engine(true);
    let ctx = RequestContext::customer(Uuid::new_v4());
    let (_, order) = place(&engine, &ctx, 5, 1).await;

    let paid = engine.record_payment(&ctx, order.id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Processing);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.payment_reference.as_deref(), Some("TXN-STATIC"));

    let admin = RequestContext::admin(Uuid::new_v4());
    let shipped = engine
        .update_order_status(&admin, order.id, OrderStatus::Shipped)
        .await
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);

    // Shipped orders are past the point of cancellation.
    let err = engine.cancel_order(&ctx, order.id).await.unwrap_err();
    assert!(matches!(err, ShopError::InvalidOrderState { .. }));
}

#[tokio::test]
async fn declined_payment_keeps_the_reservation() {
    let engine = engine(false);
    let ctx = RequestContext::customer(Uuid::new_v4());
    let (product_id, order) = place(&engine, &ctx, 5, 2).await;

    let err = engine.record_payment(&ctx, order.id).await.unwrap_err();
    assert!(matches!(err, ShopError::PaymentDeclined(_)));

    let order = engine.get_order(&ctx, order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::PaymentFailed);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    // Stock stays deducted until someone cancels.
    assert_eq!(engine.get_product(product_id).await.unwrap().stock_quantity, 3);
}

#[tokio::test]
async fn cancellation_compensates_every_line_once() {
    let engine = engine(true);
    let ctx = RequestContext::customer(Uuid::new_v4());
    let (product_id, order) = place(&engine, &ctx, 5, 2).await;
    assert_eq!(engine.get_product(product_id).await.unwrap().stock_quantity, 3);

    let cancelled = engine.cancel_order(&ctx, order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(engine.get_product(product_id).await.unwrap().stock_quantity, 5);

    // Replaying the cancel must not restore stock a second time.
    let err = engine.cancel_order(&ctx, order.id).await.unwrap_err();
    assert!(matches!(err, ShopError::InvalidOrderState { .. }));
    assert_eq!(engine.get_product(product_id).await.unwrap().stock_quantity, 5);
}

#[tokio::test]
async fn order_access_is_owner_or_admin() {
    let engine = engine(true);
    let ctx = RequestContext::customer(Uuid::new_v4());
    let (_, order) = place(&engine, &ctx, 5, 1).await;

    let stranger = RequestContext::customer(Uuid::new_v4());
    assert!(matches!(
        engine.get_order(&stranger, order.id).await.unwrap_err(),
        ShopError::UnauthorizedAccess { .. }
    ));
    assert!(engine.list_orders(&stranger).await.unwrap().is_empty());
    assert!(matches!(
        engine.list_all_orders(&stranger, None).await.unwrap_err(),
        ShopError::UnauthorizedAccess { .. }
    ));

    let admin = RequestContext::admin(Uuid::new_v4());
    assert!(engine.get_order(&admin, order.id).await.is_ok());
    let pending = engine
        .list_all_orders(&admin, Some(OrderStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn stock_corrections_are_admin_only() {
    use myshop_core::inventory::guard::StockCorrection;

    let engine = engine(true);
    let admin = RequestContext::admin(Uuid::new_v4());
    let product = Product::new("SKU-ADJ", "Adjusted", dec!(1.00), 10);
    let product_id = product.id;
    engine.add_product(&admin, product).await.unwrap();

    let corrections = [StockCorrection {
        product_id,
        delta: -4,
    }];
    let customer = RequestContext::customer(Uuid::new_v4());
    assert!(matches!(
        engine.correct_stock(&customer, &corrections).await.unwrap_err(),
        ShopError::UnauthorizedAccess { .. }
    ));

    engine.correct_stock(&admin, &corrections).await.unwrap();
    assert_eq!(engine.get_product(product_id).await.unwrap().stock_quantity, 6);
}
