use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller role, as established by the upstream request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Admin,
}

/// Authenticated identity, threaded explicitly through every call.
///
/// Background workers never share the triggering request's context, so
/// nothing here lives in a thread-local.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub buyer_id: Uuid,
    pub role: Role,
}

impl RequestContext {
    pub fn customer(buyer_id: Uuid) -> Self {
        Self {
            buyer_id,
            role: Role::Customer,
        }
    }

    pub fn admin(buyer_id: Uuid) -> Self {
        Self {
            buyer_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owner-or-admin authorization check used by order queries, cancel
    /// and payment.
    pub fn can_access_order(&self, order_buyer_id: Uuid) -> bool {
        self.is_admin() || self.buyer_id == order_buyer_id
    }
}
