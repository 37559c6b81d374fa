//! Postgres store backend.
//!
//! The conditional stock write is a single `UPDATE .. WHERE version = $v`
//! checked via `rows_affected`, never a read-then-write pair. Placement
//! runs inside one transaction; `restore_stock` and `update_order` each
//! run as their own statement so compensation commits independently of any
//! caller scope.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::{Cart, CartItem, Order, OrderItem, OrderStatus, PaymentStatus, Product};
use crate::error::{Result, ShopError};

use super::{Store, StockDeduction};

/// Postgres-backed store
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables this store needs. Safe to call repeatedly.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id UUID PRIMARY KEY,
                sku TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                price NUMERIC(10,2) NOT NULL,
                stock_quantity BIGINT NOT NULL CHECK (stock_quantity >= 0),
                version BIGINT NOT NULL DEFAULT 0,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS carts (
                buyer_id UUID PRIMARY KEY,
                items JSONB NOT NULL DEFAULT '[]',
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                buyer_id UUID NOT NULL,
                status TEXT NOT NULL,
                total_amount NUMERIC(12,2) NOT NULL,
                payment_status TEXT NOT NULL,
                payment_reference TEXT,
                shipping_address JSONB NOT NULL DEFAULT '{}',
                items JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_product(row: &sqlx::postgres::PgRow) -> Result<Product> {
        Ok(Product {
            id: row.get("id"),
            sku: row.get("sku"),
            name: row.get("name"),
            price: row.get("price"),
            stock_quantity: row.get::<i64, _>("stock_quantity") as u32,
            version: row.get::<i64, _>("version") as u64,
            active: row.get("active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order> {
        let status_str: String = row.get("status");
        let payment_str: String = row.get("payment_status");
        let items: Vec<OrderItem> = serde_json::from_value(row.get("items"))?;
        let shipping_address = serde_json::from_value(row.get("shipping_address"))?;
        Ok(Order {
            id: row.get("id"),
            buyer_id: row.get("buyer_id"),
            status: OrderStatus::try_from(status_str.as_str())
                .map_err(ShopError::Internal)?,
            total_amount: row.get::<Decimal, _>("total_amount"),
            payment_status: PaymentStatus::try_from(payment_str.as_str())
                .map_err(ShopError::Internal)?,
            payment_reference: row.get("payment_reference"),
            shipping_address,
            items,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_product(&self, product: Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, price, stock_quantity, version, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price)
        .bind(product.stock_quantity as i64)
        .bind(product.version as i64)
        .bind(product.active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> Result<Product> {
        let row = sqlx::query("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ShopError::not_found("Product", id))?;
        Self::row_to_product(&row)
    }

    async fn list_products(&self, active_only: bool) -> Result<Vec<Product>> {
        let rows = if active_only {
            sqlx::query("SELECT * FROM products WHERE active ORDER BY sku")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM products ORDER BY sku")
                .fetch_all(&self.pool)
                .await?
        };
        rows.iter().map(Self::row_to_product).collect()
    }

    #[instrument(skip(self))]
    async fn deduct_stock(&self, id: Uuid, quantity: u32, expected_version: u64) -> Result<u64> {
        let row = sqlx::query(
            r#"
            UPDATE products SET
                stock_quantity = stock_quantity - $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $3 AND stock_quantity >= $2
            RETURNING version
            "#,
        )
        .bind(id)
        .bind(quantity as i64)
        .bind(expected_version as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(r.get::<i64, _>("version") as u64),
            None => {
                // Zero rows matched: tell a version race apart from a
                // genuine shortage for the caller's sake.
                let current = self.get_product(id).await?;
                if current.version != expected_version {
                    Err(ShopError::StockConflict)
                } else {
                    Err(ShopError::InsufficientStock {
                        product_id: id,
                        requested: quantity,
                        available: current.stock_quantity,
                    })
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn restore_stock(&self, id: Uuid, quantity: u32) -> Result<u64> {
        let row = sqlx::query(
            r#"
            UPDATE products SET
                stock_quantity = stock_quantity + $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING version
            "#,
        )
        .bind(id)
        .bind(quantity as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ShopError::not_found("Product", id))?;

        Ok(row.get::<i64, _>("version") as u64)
    }

    async fn get_cart(&self, buyer_id: Uuid) -> Result<Option<Cart>> {
        let row = sqlx::query("SELECT * FROM carts WHERE buyer_id = $1")
            .bind(buyer_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let items: Vec<CartItem> = serde_json::from_value(r.get("items"))?;
            Ok(Cart {
                buyer_id: r.get("buyer_id"),
                items,
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }

    async fn put_cart(&self, cart: Cart) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (buyer_id, items, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (buyer_id) DO UPDATE SET
                items = EXCLUDED.items,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cart.buyer_id)
        .bind(serde_json::to_value(&cart.items)?)
        .bind(cart.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, order, deductions), fields(order_id = %order.id))]
    async fn commit_placement(&self, order: &Order, deductions: &[StockDeduction]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for deduction in deductions {
            let result = sqlx::query(
                r#"
                UPDATE products SET
                    stock_quantity = stock_quantity - $2,
                    version = version + 1,
                    updated_at = NOW()
                WHERE id = $1 AND version = $3 AND stock_quantity >= $2
                "#,
            )
            .bind(deduction.product_id)
            .bind(deduction.quantity as i64)
            .bind(deduction.expected_version as i64)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // Transaction rolls back on drop; nothing from earlier
                // lines survives.
                warn!(product_id = %deduction.product_id, "stock version moved during placement");
                return Err(ShopError::StockConflict);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, buyer_id, status, total_amount, payment_status,
                payment_reference, shipping_address, items, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id)
        .bind(order.buyer_id)
        .bind(order.status.as_str())
        .bind(order.total_amount)
        .bind(order.payment_status.as_str())
        .bind(&order.payment_reference)
        .bind(serde_json::to_value(&order.shipping_address)?)
        .bind(serde_json::to_value(&order.items)?)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE carts SET items = '[]', updated_at = NOW() WHERE buyer_id = $1")
            .bind(order.buyer_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(lines = deductions.len(), "placement committed");
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Order> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ShopError::not_found("Order", id))?;
        Self::row_to_order(&row)
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = $2,
                payment_status = $3,
                payment_reference = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_reference)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ShopError::not_found("Order", order.id));
        }
        Ok(())
    }

    async fn list_orders_for_buyer(&self, buyer_id: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE buyer_id = $1 ORDER BY created_at DESC",
        )
        .bind(buyer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_order).collect()
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let rows = if let Some(status) = status {
            sqlx::query("SELECT * FROM orders WHERE status = $1 ORDER BY created_at DESC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM orders ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?
        };

        rows.iter().map(Self::row_to_order).collect()
    }
}
