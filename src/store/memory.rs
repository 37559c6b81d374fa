//! In-memory store backend.
//!
//! All state sits behind a single `RwLock`, so the conditional stock write
//! and the multi-entity placement commit are genuinely atomic: the version
//! predicate is evaluated and the mutation applied under one write guard.
//! Used by tests and embedded deployments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Cart, Order, OrderStatus, Product};
use crate::error::{Result, ShopError};

use super::{Store, StockDeduction};

#[derive(Default)]
struct State {
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Cart>,
    orders: HashMap<Uuid, Order>,
}

/// Thread-safe in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_deduction(state: &mut State, deduction: &StockDeduction) -> Result<u64> {
        let product = state
            .products
            .get_mut(&deduction.product_id)
            .ok_or_else(|| ShopError::not_found("Product", deduction.product_id))?;

        if product.version != deduction.expected_version {
            return Err(ShopError::StockConflict);
        }
        if product.stock_quantity < deduction.quantity {
            return Err(ShopError::InsufficientStock {
                product_id: product.id,
                requested: deduction.quantity,
                available: product.stock_quantity,
            });
        }

        product.stock_quantity -= deduction.quantity;
        product.version += 1;
        product.updated_at = Utc::now();
        Ok(product.version)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_product(&self, product: Product) -> Result<()> {
        let mut state = self.state.write().expect("store lock poisoned");
        state.products.insert(product.id, product);
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> Result<Product> {
        let state = self.state.read().expect("store lock poisoned");
        state
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| ShopError::not_found("Product", id))
    }

    async fn list_products(&self, active_only: bool) -> Result<Vec<Product>> {
        let state = self.state.read().expect("store lock poisoned");
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| !active_only || p.active)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(products)
    }

    async fn deduct_stock(&self, id: Uuid, quantity: u32, expected_version: u64) -> Result<u64> {
        let mut state = self.state.write().expect("store lock poisoned");
        Self::apply_deduction(
            &mut state,
            &StockDeduction {
                product_id: id,
                quantity,
                expected_version,
            },
        )
    }

    async fn restore_stock(&self, id: Uuid, quantity: u32) -> Result<u64> {
        let mut state = self.state.write().expect("store lock poisoned");
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| ShopError::not_found("Product", id))?;

        product.stock_quantity = product.stock_quantity.saturating_add(quantity);
        product.version += 1;
        product.updated_at = Utc::now();
        Ok(product.version)
    }

    async fn get_cart(&self, buyer_id: Uuid) -> Result<Option<Cart>> {
        let state = self.state.read().expect("store lock poisoned");
        Ok(state.carts.get(&buyer_id).cloned())
    }

    async fn put_cart(&self, cart: Cart) -> Result<()> {
        let mut state = self.state.write().expect("store lock poisoned");
        state.carts.insert(cart.buyer_id, cart);
        Ok(())
    }

    async fn commit_placement(&self, order: &Order, deductions: &[StockDeduction]) -> Result<()> {
        let mut state = self.state.write().expect("store lock poisoned");

        // Validate every line before touching anything, so a late conflict
        // leaves earlier lines untouched.
        for deduction in deductions {
            let product = state
                .products
                .get(&deduction.product_id)
                .ok_or_else(|| ShopError::not_found("Product", deduction.product_id))?;
            if product.version != deduction.expected_version {
                return Err(ShopError::StockConflict);
            }
            if product.stock_quantity < deduction.quantity {
                return Err(ShopError::InsufficientStock {
                    product_id: product.id,
                    requested: deduction.quantity,
                    available: product.stock_quantity,
                });
            }
        }

        for deduction in deductions {
            Self::apply_deduction(&mut state, deduction)?;
        }

        state.orders.insert(order.id, order.clone());
        if let Some(cart) = state.carts.get_mut(&order.buyer_id) {
            cart.clear();
        }

        debug!(order_id = %order.id, lines = deductions.len(), "placement committed");
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Order> {
        let state = self.state.read().expect("store lock poisoned");
        state
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| ShopError::not_found("Order", id))
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().expect("store lock poisoned");
        if !state.orders.contains_key(&order.id) {
            return Err(ShopError::not_found("Order", order.id));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn list_orders_for_buyer(&self, buyer_id: Uuid) -> Result<Vec<Order>> {
        let state = self.state.read().expect("store lock poisoned");
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.buyer_id == buyer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let state = self.state.read().expect("store lock poisoned");
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(stock: u32) -> Product {
        Product::new("SKU-T", "Test product", dec!(10.00), stock)
    }

    #[tokio::test]
    async fn deduct_with_stale_version_conflicts() {
        let store = MemoryStore::new();
        let p = product(5);
        let id = p.id;
        store.insert_product(p).await.unwrap();

        let v1 = store.deduct_stock(id, 1, 0).await.unwrap();
        assert_eq!(v1, 1);

        // Same observed version again: the first writer won, this one loses.
        let err = store.deduct_stock(id, 1, 0).await.unwrap_err();
        assert!(matches!(err, ShopError::StockConflict));
    }

    #[tokio::test]
    async fn deduct_checks_available_stock() {
        let store = MemoryStore::new();
        let p = product(2);
        let id = p.id;
        store.insert_product(p).await.unwrap();

        let err = store.deduct_stock(id, 3, 0).await.unwrap_err();
        assert!(matches!(err, ShopError::InsufficientStock { available: 2, .. }));
    }

    #[tokio::test]
    async fn restore_never_conflicts_and_bumps_version() {
        let store = MemoryStore::new();
        let p = product(0);
        let id = p.id;
        store.insert_product(p).await.unwrap();

        let v = store.restore_stock(id, 3).await.unwrap();
        assert_eq!(v, 1);
        let p = store.get_product(id).await.unwrap();
        assert_eq!(p.stock_quantity, 3);
    }

    #[tokio::test]
    async fn conflicting_placement_commit_leaves_nothing_behind() {
        let store = MemoryStore::new();
        let a = product(5);
        let b = product(5);
        let (a_id, b_id) = (a.id, b.id);
        store.insert_product(a).await.unwrap();
        store.insert_product(b).await.unwrap();

        // Concurrent writer moved product b forward.
        store.deduct_stock(b_id, 1, 0).await.unwrap();

        let order = Order::new(Uuid::new_v4(), Default::default(), vec![]);
        let deductions = vec![
            StockDeduction { product_id: a_id, quantity: 2, expected_version: 0 },
            StockDeduction { product_id: b_id, quantity: 2, expected_version: 0 },
        ];
        let err = store.commit_placement(&order, &deductions).await.unwrap_err();
        assert!(matches!(err, ShopError::StockConflict));

        // First line untouched, order absent.
        assert_eq!(store.get_product(a_id).await.unwrap().stock_quantity, 5);
        assert!(store.get_order(order.id).await.is_err());
    }
}
