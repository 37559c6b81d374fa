//! Persistence seam for the order engine.
//!
//! The engine talks to one `Store` implementation. The contract every
//! backend must honor:
//!
//! - `deduct_stock` / `restore_stock` are single atomic writes, never
//!   read-then-write pairs;
//! - `commit_placement` applies all stock deductions, the order insert and
//!   the cart clear as one unit of work; a version mismatch on any line
//!   aborts the whole commit with nothing persisted;
//! - `restore_stock` and `update_order` each commit independently, so a
//!   compensating stock restoration survives a failure in the operation
//!   that triggered it.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Cart, Order, OrderStatus, Product};
use crate::error::Result;

/// A conditional-write intent produced by the stock guard and consumed
/// atomically by `commit_placement`.
#[derive(Debug, Clone)]
pub struct StockDeduction {
    pub product_id: Uuid,
    pub quantity: u32,
    /// Version observed when the deduction was prepared; the write matches
    /// zero rows if the product has moved on since.
    pub expected_version: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ── Products ──────────────────────────────────────────────────────

    async fn insert_product(&self, product: Product) -> Result<()>;

    async fn get_product(&self, id: Uuid) -> Result<Product>;

    /// Catalog listing, optionally restricted to active products.
    async fn list_products(&self, active_only: bool) -> Result<Vec<Product>>;

    /// Conditional stock deduction: `stock -= quantity` where
    /// `version == expected_version`, in one atomic write. Returns the new
    /// version. Zero rows matched surfaces as `StockConflict`.
    async fn deduct_stock(&self, id: Uuid, quantity: u32, expected_version: u64) -> Result<u64>;

    /// Unconditional atomic stock increment (compensation path). Still
    /// bumps the version stamp. Commits independently of any caller scope.
    async fn restore_stock(&self, id: Uuid, quantity: u32) -> Result<u64>;

    // ── Carts ─────────────────────────────────────────────────────────

    async fn get_cart(&self, buyer_id: Uuid) -> Result<Option<Cart>>;

    async fn put_cart(&self, cart: Cart) -> Result<()>;

    // ── Orders ────────────────────────────────────────────────────────

    /// Atomic placement commit: apply every deduction (CAS per product),
    /// insert the order with its items, clear the buyer's cart. Any
    /// version mismatch aborts the whole unit with `StockConflict`.
    async fn commit_placement(&self, order: &Order, deductions: &[StockDeduction]) -> Result<()>;

    async fn get_order(&self, id: Uuid) -> Result<Order>;

    /// Persist status/payment/timestamp mutations of an existing order.
    async fn update_order(&self, order: &Order) -> Result<()>;

    /// Buyer's orders, newest first.
    async fn list_orders_for_buyer(&self, buyer_id: Uuid) -> Result<Vec<Order>>;

    /// All orders, newest first, optionally filtered by status. Admin use.
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>>;
}
