pub mod analytics;
pub mod dead_letter;
pub mod inventory_sync;
pub mod notification;

pub use analytics::{ActivityLogConsumer, AnalyticsConsumer, AnalyticsRecord, AnalyticsStore};
pub use dead_letter::DeadLetterMonitor;
pub use inventory_sync::InventorySyncConsumer;
pub use notification::{
    NotificationConsumer, NotificationRecord, NotificationStore, ORDER_CONFIRMED,
};
