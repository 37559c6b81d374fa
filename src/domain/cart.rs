use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One line in a buyer's cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: u32,
}

/// Per-buyer mutable staging area for a future order.
///
/// Carts are per-buyer and need no cross-buyer coordination; a cart is
/// cleared only after the order it produced has durably committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub buyer_id: Uuid,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(buyer_id: Uuid) -> Self {
        Self {
            buyer_id,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add quantity to an existing line or append a new one.
    pub fn add_item(&mut self, product_id: Uuid, quantity: u32) {
        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = item.quantity.saturating_add(quantity);
        } else {
            self.items.push(CartItem {
                product_id,
                quantity,
            });
        }
        self.updated_at = Utc::now();
    }

    /// Set a line's quantity; zero removes the line.
    pub fn set_quantity(&mut self, product_id: Uuid, quantity: u32) {
        if quantity == 0 {
            self.items.retain(|i| i.product_id != product_id);
        } else if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = quantity;
        } else {
            self.items.push(CartItem {
                product_id,
                quantity,
            });
        }
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.updated_at = Utc::now();
    }
}
