//! End-to-end placement behavior through the engine facade.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal_macros::dec;
use uuid::Uuid;

use myshop_core::domain::{Product, RequestContext};
use myshop_core::{AppConfig, OrderEngine, ShopError};

fn engine() -> Arc<OrderEngine> {
    Arc::new(OrderEngine::in_memory(AppConfig::default()))
}

async fn seed_product(engine: &OrderEngine, stock: u32) -> Uuid {
    let admin = RequestContext::admin(Uuid::new_v4());
    let product = Product::new("SKU-100", "Desk lamp", dec!(25.00), stock);
    let id = product.id;
    engine.add_product(&admin, product).await.unwrap();
    id
}

#[tokio::test]
async fn placement_deducts_stock_and_clears_cart() {
    let engine = engine();
    let product_id = seed_product(&engine, 10).await;
    let ctx = RequestContext::customer(Uuid::new_v4());

    engine.add_to_cart(&ctx, product_id, 3).await.unwrap();
    let order = engine.place_order(&ctx, HashMap::new()).await.unwrap();

    assert_eq!(order.total_amount, dec!(75.00));
    assert!(order.total_is_consistent());
    assert_eq!(engine.get_product(product_id).await.unwrap().stock_quantity, 7);
    assert!(engine.get_cart(&ctx).await.unwrap().is_empty());

    // Placing again with the now empty cart is rejected.
    let err = engine.place_order(&ctx, HashMap::new()).await.unwrap_err();
    assert!(matches!(err, ShopError::EmptyCart));
}

#[tokio::test]
async fn competing_buyers_never_oversell_the_last_unit() {
    let engine = engine();
    let product_id = seed_product(&engine, 1).await;

    let alice = RequestContext::customer(Uuid::new_v4());
    let bob = RequestContext::customer(Uuid::new_v4());
    engine.add_to_cart(&alice, product_id, 1).await.unwrap();
    engine.add_to_cart(&bob, product_id, 1).await.unwrap();

    let (a, b) = tokio::join!(
        {
            let engine = engine.clone();
            async move { engine.place_order(&alice, HashMap::new()).await }
        },
        {
            let engine = engine.clone();
            async move { engine.place_order(&bob, HashMap::new()).await }
        },
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one placement may win the last unit");

    let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(
        matches!(loser, ShopError::StockConflict | ShopError::InsufficientStock { .. }),
        "loser saw {loser:?}"
    );
    assert!(loser.is_retryable() || matches!(loser, ShopError::InsufficientStock { .. }));

    // Stock went to zero exactly once and exactly one order exists.
    assert_eq!(engine.get_product(product_id).await.unwrap().stock_quantity, 0);
    let admin = RequestContext::admin(Uuid::new_v4());
    assert_eq!(engine.list_all_orders(&admin, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_multi_line_placement_persists_nothing() {
    let engine = engine();
    let plentiful = seed_product(&engine, 10).await;

    let admin = RequestContext::admin(Uuid::new_v4());
    let scarce = Product::new("SKU-200", "Limited run", dec!(99.00), 1);
    let scarce_id = scarce.id;
    engine.add_product(&admin, scarce).await.unwrap();

    let ctx = RequestContext::customer(Uuid::new_v4());
    engine.add_to_cart(&ctx, plentiful, 2).await.unwrap();
    engine.add_to_cart(&ctx, scarce_id, 5).await.unwrap();

    let err = engine.place_order(&ctx, HashMap::new()).await.unwrap_err();
    assert!(matches!(err, ShopError::InsufficientStock { .. }));

    // The plentiful line was not deducted and the cart survives intact.
    assert_eq!(engine.get_product(plentiful).await.unwrap().stock_quantity, 10);
    assert_eq!(engine.get_cart(&ctx).await.unwrap().items.len(), 2);
    assert!(engine.list_orders(&ctx).await.unwrap().is_empty());
}

#[tokio::test]
async fn cart_updates_merge_and_remove_lines() {
    let engine = engine();
    let product_id = seed_product(&engine, 10).await;
    let ctx = RequestContext::customer(Uuid::new_v4());

    engine.add_to_cart(&ctx, product_id, 1).await.unwrap();
    let cart = engine.add_to_cart(&ctx, product_id, 2).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 3);

    let cart = engine.update_cart_item(&ctx, product_id, 0).await.unwrap();
    assert!(cart.is_empty());
}

#[tokio::test]
async fn inactive_products_are_hidden_from_customers() {
    let engine = engine();
    seed_product(&engine, 5).await;

    let admin = RequestContext::admin(Uuid::new_v4());
    let mut retired = Product::new("SKU-900", "Retired", dec!(1.00), 0);
    retired.active = false;
    engine.add_product(&admin, retired).await.unwrap();

    let ctx = RequestContext::customer(Uuid::new_v4());
    assert_eq!(engine.list_products(&ctx).await.unwrap().len(), 1);
    assert_eq!(engine.list_products(&admin).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_product_cannot_enter_a_cart() {
    let engine = engine();
    let ctx = RequestContext::customer(Uuid::new_v4());
    let err = engine
        .add_to_cart(&ctx, Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ShopError::ResourceNotFound { .. }));
}
