use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Order lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order placed, awaiting payment
    Pending,
    /// Payment succeeded, order being prepared
    Processing,
    /// Handed to the carrier
    Shipped,
    /// Received by the buyer
    Delivered,
    /// Cancelled by the buyer or an admin; stock restored
    Cancelled,
    /// Payment declined; stock stays reserved (cancellation is the only
    /// path that restores it)
    PaymentFailed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, target) {
            // From Pending
            (Pending, Processing) => true,    // Payment succeeded
            (Pending, PaymentFailed) => true, // Payment declined
            (Pending, Cancelled) => true,     // Buyer/admin cancel

            // From Processing
            (Processing, Shipped) => true,   // Fulfilment started
            (Processing, Cancelled) => true, // Still cancellable until shipped

            // From Shipped
            (Shipped, Delivered) => true,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<OrderStatus> {
        use OrderStatus::*;

        match self {
            Pending => vec![Processing, PaymentFailed, Cancelled],
            Processing => vec![Shipped, Cancelled],
            Shipped => vec![Delivered],
            Delivered | Cancelled | PaymentFailed => vec![],
        }
    }

    /// Is this a terminal state?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::PaymentFailed
        )
    }

    /// Can an order in this state still be cancelled?
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "PAYMENT_FAILED" => Ok(OrderStatus::PaymentFailed),
            other => Err(format!("Unknown order status: {other}")),
        }
    }
}

/// Payment state, tracked separately from the order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("Unknown payment status: {other}")),
        }
    }
}

/// A price-snapshotted order line.
///
/// `unit_price` is captured at placement time and never re-read from the
/// product afterwards; `subtotal` is always `unit_price * quantity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl OrderItem {
    pub fn new(product_id: Uuid, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            unit_price,
            subtotal: unit_price * Decimal::from(quantity),
        }
    }
}

/// An immutable, priced order.
///
/// Created once per successful placement; only status/payment fields and
/// `updated_at` change afterwards. Owns its items (they live and die with
/// the order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub shipping_address: HashMap<String, String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        buyer_id: Uuid,
        shipping_address: HashMap<String, String>,
        items: Vec<OrderItem>,
    ) -> Self {
        let total_amount = items.iter().map(|i| i.subtotal).sum();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            buyer_id,
            status: OrderStatus::Pending,
            total_amount,
            payment_status: PaymentStatus::Pending,
            payment_reference: None,
            shipping_address,
            items,
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant check: total equals the sum of item subtotals.
    pub fn total_is_consistent(&self) -> bool {
        self.total_amount == self.items.iter().map(|i| i.subtotal).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn transition_table_matches_lifecycle() {
        use OrderStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(PaymentFailed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Delivered));

        // No resurrection from terminal states
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Delivered.can_transition_to(Shipped));
        assert!(!PaymentFailed.can_transition_to(Processing));
        // Shipped orders can no longer be cancelled
        assert!(!Shipped.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::PaymentFailed.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Pending.is_cancellable());
        assert!(!OrderStatus::Shipped.is_cancellable());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::PaymentFailed,
        ] {
            assert_eq!(OrderStatus::try_from(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::try_from("REFUNDED").is_err());
    }

    #[test]
    fn order_total_is_sum_of_subtotals() {
        let items = vec![
            OrderItem::new(Uuid::new_v4(), 2, dec!(10.00)),
            OrderItem::new(Uuid::new_v4(), 1, dec!(5.50)),
        ];
        let order = Order::new(Uuid::new_v4(), HashMap::new(), items);
        assert_eq!(order.total_amount, dec!(25.50));
        assert!(order.total_is_consistent());
    }
}
