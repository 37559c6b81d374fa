//! At-least-once event publication pipeline.
//!
//! An in-process, partitioned, append-only log plus a consumer runtime
//! with manual acknowledgment, fixed-backoff retry and dead-letter
//! routing. Ordering is guaranteed only within a partition key; consumers
//! that crash before acknowledging see the same record again.

mod consumer;
mod log;

pub use consumer::{ConsumerWorker, EventHandler, RetryPolicy};
pub use log::EventLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record in a topic partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Partitioning key: the causally relevant id (buyer for placement
    /// events, product for inventory events).
    pub key: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl Record {
    /// Deserialize the payload into a typed event.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Failure context attached to a dead-lettered record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub original_topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: serde_json::Value,
    pub consumer_group: String,
    pub attempts: u32,
    pub last_error: String,
}
