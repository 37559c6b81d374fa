//! Order placement and inventory consistency engine for an online store.
//!
//! The engine owns the write path for orders and stock: optimistic
//! version-checked stock writes, an atomic placement commit, compensating
//! cancellation, an at-least-once event pipeline with dead-lettering, and
//! background fan-out with caller-runs backpressure. [`OrderEngine`] wires
//! the pieces together over a pluggable [`store::Store`] backend.

pub mod config;
pub mod consumers;
pub mod domain;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod orders;
pub mod pipeline;
pub mod store;
pub mod workers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

pub use crate::config::AppConfig;
pub use crate::error::{Result, ShopError};

use crate::consumers::{
    ActivityLogConsumer, AnalyticsConsumer, AnalyticsStore, DeadLetterMonitor,
    InventorySyncConsumer, NotificationConsumer, NotificationRecord, NotificationStore,
};
use crate::domain::events::topics;
use crate::domain::{Cart, Order, OrderStatus, Product, RequestContext};
use crate::inventory::{guard::StockCorrection, LockManager, StockGuard};
use crate::orders::{
    OrderLifecycleService, OrderPlacementCoordinator, PaymentGateway, SimulatedPaymentGateway,
};
use crate::pipeline::{ConsumerWorker, EventHandler, EventLog, Record, RetryPolicy};
use crate::store::{MemoryStore, PostgresStore, Store};
use crate::workers::TaskPool;

/// Fully wired engine: store, stock guard, lock manager, event pipeline,
/// consumer workers and background pools.
pub struct OrderEngine {
    config: AppConfig,
    store: Arc<dyn Store>,
    log: Arc<EventLog>,
    locks: Arc<LockManager>,
    guard: StockGuard,
    coordinator: OrderPlacementCoordinator,
    lifecycle: OrderLifecycleService,
    notifications: Arc<NotificationStore>,
    analytics: Arc<AnalyticsStore>,
    general_pool: Arc<TaskPool>,
    analytics_pool: Arc<TaskPool>,
    consumers: Mutex<Vec<(Arc<ConsumerWorker>, JoinHandle<()>)>>,
}

impl OrderEngine {
    /// Wire an engine over the given backend and payment gateway.
    pub fn new(config: AppConfig, store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>) -> Self {
        let log = Arc::new(EventLog::new(config.pipeline.partitions));
        let locks = Arc::new(LockManager::new());
        let guard = StockGuard::new(store.clone(), log.clone());

        let general_pool = Arc::new(TaskPool::new(
            "general",
            config.workers.general_workers,
            config.workers.general_queue_capacity,
        ));
        let analytics_pool = Arc::new(TaskPool::new(
            "analytics",
            config.workers.analytics_workers,
            config.workers.analytics_queue_capacity,
        ));

        let coordinator = OrderPlacementCoordinator::new(
            store.clone(),
            guard.clone(),
            log.clone(),
            general_pool.clone(),
            analytics_pool.clone(),
        );
        let lifecycle =
            OrderLifecycleService::new(store.clone(), guard.clone(), log.clone(), gateway);

        Self {
            config,
            store,
            log,
            locks,
            guard,
            coordinator,
            lifecycle,
            notifications: Arc::new(NotificationStore::new()),
            analytics: Arc::new(AnalyticsStore::new()),
            general_pool,
            analytics_pool,
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Engine over the in-memory backend with the simulated gateway.
    pub fn in_memory(config: AppConfig) -> Self {
        let gateway = Arc::new(SimulatedPaymentGateway::new(&config.payment));
        Self::new(config, Arc::new(MemoryStore::new()), gateway)
    }

    /// Engine over the Postgres backend named by `database.url`.
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let url = config.database.url.clone().ok_or_else(|| {
            ShopError::Internal("database.url is not configured".to_string())
        })?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&url)
            .await?;
        let store = PostgresStore::new(pool);
        store.ensure_schema().await?;
        let gateway = Arc::new(SimulatedPaymentGateway::new(&config.payment));
        Ok(Self::new(config, Arc::new(store), gateway))
    }

    /// Start the consumer workers. Idempotent only in the sense that it
    /// should be called once per engine; call [`stop`](Self::stop) before
    /// dropping the engine in long-running processes.
    pub fn start(&self) {
        let policy = RetryPolicy::from_config(&self.config.pipeline);
        let poll = Duration::from_millis(self.config.pipeline.poll_interval_ms);

        let workers: Vec<(&str, &str, Arc<dyn EventHandler>)> = vec![
            (
                topics::ORDER_PLACED,
                "notification-service",
                Arc::new(NotificationConsumer::new(self.notifications.clone())),
            ),
            (
                topics::ORDER_PLACED,
                "analytics-service",
                Arc::new(AnalyticsConsumer::new(self.analytics.clone())),
            ),
            (
                topics::USER_ACTIVITY,
                "activity-log-service",
                Arc::new(ActivityLogConsumer::new(self.analytics.clone())),
            ),
            (
                topics::INVENTORY_UPDATED,
                "inventory-sync-service",
                Arc::new(InventorySyncConsumer::new()),
            ),
            (
                topics::DEAD_LETTER,
                "dlt-monitor",
                Arc::new(DeadLetterMonitor::new()),
            ),
        ];

        let mut running = self.consumers.lock().expect("consumer registry poisoned");
        for (topic, group, handler) in workers {
            let worker = Arc::new(ConsumerWorker::new(
                self.log.clone(),
                topic,
                group,
                handler,
                policy.clone(),
                poll,
            ));
            let handle = worker.clone().spawn();
            running.push((worker, handle));
        }
        info!(workers = running.len(), "consumer workers started");
    }

    /// Stop consumer workers and drain the background pools.
    pub async fn stop(&self) {
        let workers = std::mem::take(&mut *self.consumers.lock().expect("consumer registry poisoned"));
        for (worker, _) in &workers {
            worker.stop();
        }
        futures::future::join_all(workers.into_iter().map(|(_, handle)| handle)).await;
        self.general_pool.shutdown().await;
        self.analytics_pool.shutdown().await;
        info!("engine stopped");
    }

    // ── Catalog ───────────────────────────────────────────────────────

    /// Add a product to the catalog. Admin only.
    pub async fn add_product(&self, ctx: &RequestContext, product: Product) -> Result<Product> {
        if !ctx.is_admin() {
            return Err(ShopError::UnauthorizedAccess { resource: "product" });
        }
        let copy = product.clone();
        self.store.insert_product(product).await?;
        Ok(copy)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product> {
        self.store.get_product(id).await
    }

    /// Catalog listing; customers see active products only.
    pub async fn list_products(&self, ctx: &RequestContext) -> Result<Vec<Product>> {
        self.store.list_products(!ctx.is_admin()).await
    }

    /// Apply a batch of stock corrections under the correction lease.
    /// Admin only.
    pub async fn correct_stock(
        &self,
        ctx: &RequestContext,
        corrections: &[StockCorrection],
    ) -> Result<()> {
        if !ctx.is_admin() {
            return Err(ShopError::UnauthorizedAccess { resource: "inventory" });
        }
        self.guard
            .correct_stock_levels(
                &self.locks,
                corrections,
                Duration::from_millis(self.config.locks.wait_timeout_ms),
                Duration::from_millis(self.config.locks.lease_timeout_ms),
            )
            .await
    }

    // ── Cart ──────────────────────────────────────────────────────────

    /// The caller's cart; an empty one if nothing was added yet.
    pub async fn get_cart(&self, ctx: &RequestContext) -> Result<Cart> {
        Ok(self
            .store
            .get_cart(ctx.buyer_id)
            .await?
            .unwrap_or_else(|| Cart::new(ctx.buyer_id)))
    }

    /// Add quantity of a product to the caller's cart. The product must
    /// exist and be active; no stock is reserved until placement.
    pub async fn add_to_cart(
        &self,
        ctx: &RequestContext,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Cart> {
        let product = self.store.get_product(product_id).await?;
        if !product.active {
            return Err(ShopError::ProductInactive { product_id });
        }
        let mut cart = self.get_cart(ctx).await?;
        cart.add_item(product_id, quantity);
        self.store.put_cart(cart.clone()).await?;
        Ok(cart)
    }

    /// Set a cart line's quantity; zero removes the line.
    pub async fn update_cart_item(
        &self,
        ctx: &RequestContext,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Cart> {
        let mut cart = self.get_cart(ctx).await?;
        cart.set_quantity(product_id, quantity);
        self.store.put_cart(cart.clone()).await?;
        Ok(cart)
    }

    // ── Orders ────────────────────────────────────────────────────────

    pub async fn place_order(
        &self,
        ctx: &RequestContext,
        shipping_address: HashMap<String, String>,
    ) -> Result<Order> {
        self.coordinator.place_order(ctx, shipping_address).await
    }

    pub async fn record_payment(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Order> {
        self.lifecycle.record_payment(ctx, order_id).await
    }

    pub async fn cancel_order(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Order> {
        self.lifecycle.cancel(ctx, order_id).await
    }

    pub async fn update_order_status(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<Order> {
        self.lifecycle.update_status(ctx, order_id, target).await
    }

    pub async fn get_order(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Order> {
        self.lifecycle.get_order(ctx, order_id).await
    }

    pub async fn list_orders(&self, ctx: &RequestContext) -> Result<Vec<Order>> {
        self.lifecycle.list_orders(ctx).await
    }

    pub async fn list_all_orders(
        &self,
        ctx: &RequestContext,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        self.lifecycle.list_all_orders(ctx, status).await
    }

    // ── Notifications ─────────────────────────────────────────────────

    /// The caller's notifications, newest first.
    pub fn notifications_for(&self, ctx: &RequestContext) -> Vec<NotificationRecord> {
        self.notifications.for_buyer(ctx.buyer_id)
    }

    pub fn mark_notification_read(&self, ctx: &RequestContext, id: Uuid) -> Result<()> {
        self.notifications.mark_read(ctx.buyer_id, id)
    }

    // ── Observation ───────────────────────────────────────────────────

    /// Records parked on the dead-letter topic, for operator inspection.
    pub fn dead_letters(&self) -> Vec<Record> {
        self.log.records(topics::DEAD_LETTER)
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn stock_guard(&self) -> &StockGuard {
        &self.guard
    }

    pub fn analytics(&self) -> &Arc<AnalyticsStore> {
        &self.analytics
    }

    pub fn notifications(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
