//! Order lifecycle: payment, cancellation, status administration.
//!
//! Cancellation is a compensating transaction: each line's stock is
//! restored through its own committed write before the order flips to
//! CANCELLED, so a crash mid-cancel can leave stock restored with the
//! cancel incomplete (retried later), but never the reverse. Payment
//! failure deliberately does NOT restore stock; a PAYMENT_FAILED order
//! keeps its reservation until someone cancels it.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::domain::events::{topics, OrderEvent, StockChangeReason};
use crate::domain::{Order, OrderStatus, PaymentStatus, RequestContext};
use crate::error::{Result, ShopError};
use crate::inventory::StockGuard;
use crate::pipeline::EventLog;
use crate::store::Store;

/// Outcome of a charge attempt.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub approved: bool,
    pub reference: Option<String>,
}

/// Seam to the payment provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, order: &Order) -> Result<PaymentOutcome>;
}

/// Stand-in gateway: approves a configurable fraction of charges and
/// mints a fake transaction reference.
pub struct SimulatedPaymentGateway {
    success_rate: Decimal,
}

impl SimulatedPaymentGateway {
    pub fn new(config: &PaymentConfig) -> Self {
        Self {
            success_rate: config.success_rate,
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn charge(&self, order: &Order) -> Result<PaymentOutcome> {
        let rate = self.success_rate.to_f64().unwrap_or(0.9).clamp(0.0, 1.0);
        let approved = rand::thread_rng().gen_bool(rate);
        let reference = approved.then(|| {
            let token = Uuid::new_v4().simple().to_string();
            format!("MOCK-TXN-{}", token[..8].to_uppercase())
        });
        info!(order_id = %order.id, approved, "charge attempted");
        Ok(PaymentOutcome {
            approved,
            reference,
        })
    }
}

/// Payment, cancellation and admin status management for existing orders.
pub struct OrderLifecycleService {
    store: Arc<dyn Store>,
    guard: StockGuard,
    log: Arc<EventLog>,
    gateway: Arc<dyn PaymentGateway>,
}

impl OrderLifecycleService {
    pub fn new(
        store: Arc<dyn Store>,
        guard: StockGuard,
        log: Arc<EventLog>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            store,
            guard,
            log,
            gateway,
        }
    }

    /// Fetch one order, owner-or-admin.
    pub async fn get_order(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Order> {
        let order = self.store.get_order(order_id).await?;
        if !ctx.can_access_order(order.buyer_id) {
            return Err(ShopError::UnauthorizedAccess { resource: "order" });
        }
        Ok(order)
    }

    /// The caller's own orders, newest first.
    pub async fn list_orders(&self, ctx: &RequestContext) -> Result<Vec<Order>> {
        self.store.list_orders_for_buyer(ctx.buyer_id).await
    }

    /// Every order, optionally filtered by status. Admin only.
    pub async fn list_all_orders(
        &self,
        ctx: &RequestContext,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        if !ctx.is_admin() {
            return Err(ShopError::UnauthorizedAccess { resource: "orders" });
        }
        self.store.list_orders(status).await
    }

    /// Charge the buyer for a PENDING order.
    ///
    /// Approval moves the order to PROCESSING; a decline records
    /// PAYMENT_FAILED, keeps the stock reserved and surfaces
    /// `PaymentDeclined` after the state has been persisted.
    #[instrument(skip(self, ctx), fields(buyer_id = %ctx.buyer_id))]
    pub async fn record_payment(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Order> {
        let mut order = self.store.get_order(order_id).await?;
        if order.buyer_id != ctx.buyer_id {
            return Err(ShopError::UnauthorizedAccess { resource: "order" });
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(ShopError::AlreadyPaid);
        }

        let outcome = self.gateway.charge(&order).await?;
        if outcome.approved {
            self.transition(&mut order, OrderStatus::Processing)?;
            order.payment_status = PaymentStatus::Paid;
            order.payment_reference = outcome.reference;
            order.updated_at = chrono::Utc::now();
            self.store.update_order(&order).await?;
            self.publish_status(&order);
            info!(%order_id, reference = ?order.payment_reference, "payment recorded");
            Ok(order)
        } else {
            self.transition(&mut order, OrderStatus::PaymentFailed)?;
            order.payment_status = PaymentStatus::Failed;
            order.updated_at = chrono::Utc::now();
            // Persist the failure first; the error reaches the caller only
            // after the order reflects it. No stock restoration here.
            self.store.update_order(&order).await?;
            self.publish_status(&order);
            warn!(%order_id, "payment declined");
            Err(ShopError::PaymentDeclined(
                "charge declined by gateway".into(),
            ))
        }
    }

    /// Cancel an order and give its stock back.
    ///
    /// Restores run first, one committed write per line; the status flip to
    /// CANCELLED comes last. A second cancel of the same order is rejected
    /// by the state machine before any restore runs, so stock is returned
    /// exactly once.
    #[instrument(skip(self, ctx), fields(buyer_id = %ctx.buyer_id))]
    pub async fn cancel(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Order> {
        let mut order = self.store.get_order(order_id).await?;
        if !ctx.can_access_order(order.buyer_id) {
            return Err(ShopError::UnauthorizedAccess { resource: "order" });
        }
        if !order.status.is_cancellable() {
            return Err(ShopError::InvalidOrderState {
                from: order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }

        for item in &order.items {
            self.guard
                .restore(item.product_id, item.quantity, StockChangeReason::OrderCancelled)
                .await?;
        }

        self.transition(&mut order, OrderStatus::Cancelled)?;
        order.updated_at = chrono::Utc::now();
        self.store.update_order(&order).await?;
        self.publish_status(&order);
        info!(%order_id, "order cancelled, stock restored");
        Ok(order)
    }

    /// Admin-driven fulfilment transition (PROCESSING → SHIPPED and so on).
    #[instrument(skip(self, ctx))]
    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<Order> {
        if !ctx.is_admin() {
            return Err(ShopError::UnauthorizedAccess { resource: "order" });
        }
        let mut order = self.store.get_order(order_id).await?;
        self.transition(&mut order, target)?;
        order.updated_at = chrono::Utc::now();
        self.store.update_order(&order).await?;
        self.publish_status(&order);
        info!(%order_id, status = %order.status, "order status updated");
        Ok(order)
    }

    fn transition(&self, order: &mut Order, target: OrderStatus) -> Result<()> {
        if !order.status.can_transition_to(target) {
            return Err(ShopError::InvalidOrderState {
                from: order.status.to_string(),
                to: target.to_string(),
            });
        }
        order.status = target;
        Ok(())
    }

    fn publish_status(&self, order: &Order) {
        let event = OrderEvent::new(order.id, order.buyer_id, order.total_amount, order.status);
        if let Err(e) =
            self.log
                .publish(topics::ORDER_STATUS_UPDATED, &order.id.to_string(), &event)
        {
            warn!(order_id = %order.id, error = %e, "failed to publish order.status.updated");
        }
    }
}
