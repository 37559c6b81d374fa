use thiserror::Error;
use uuid::Uuid;

/// Main error type for the order engine
#[derive(Error, Debug)]
pub enum ShopError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Lookup errors
    #[error("{resource} not found: {id}")]
    ResourceNotFound { resource: &'static str, id: String },

    // Business rule violations
    #[error("Cart is empty, cannot place order")]
    EmptyCart,

    #[error("Product is no longer available: {product_id}")]
    ProductInactive { product_id: Uuid },

    #[error("Order is already paid")]
    AlreadyPaid,

    #[error("Invalid order state transition: from {from} to {to}")]
    InvalidOrderState { from: String, to: String },

    #[error("Unauthorized access to {resource}")]
    UnauthorizedAccess { resource: &'static str },

    // Stock errors (distinguished from generic violations so callers can
    // render "out of stock" vs "try again")
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Stock was updated by a concurrent request, retry the operation")]
    StockConflict,

    // Lock errors
    #[error("Timed out waiting for lock: {key}")]
    LockTimeout { key: String },

    #[error("Stale lock handle for {key}: lease expired")]
    LockExpired { key: String },

    // Payment errors
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ShopError {
    /// Convenience constructor for not-found errors
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::ResourceNotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether the caller can reasonably retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StockConflict | Self::LockTimeout { .. })
    }
}

/// Result type alias for ShopError
pub type Result<T> = std::result::Result<T, ShopError>;
