//! Consumer runtime: manual acknowledgment, fixed-backoff retry,
//! dead-letter routing.
//!
//! A worker owns one (topic, group) pair and walks every partition in
//! order. A record is acknowledged (offset committed) only after its
//! handler returns Ok, or after the retry budget is spent and the record
//! has been moved to the dead-letter topic. The dead-letter topic is a
//! terminal sink for operator inspection, never an automatic replay queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::domain::events::topics;
use crate::error::Result;

use super::{DeadLetter, EventLog, Record};

/// A message handler. Returning Ok acknowledges the record; returning Err
/// (or crashing before returning) causes redelivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, record: &Record) -> Result<()>;
}

/// Fixed-backoff retry policy (mirrors the broker-side error handler of
/// the upstream deployment: 3 attempts, 1 s apart, then dead-letter).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            max_attempts: cfg.max_delivery_attempts,
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

/// One consumer group's worker for one topic.
pub struct ConsumerWorker {
    log: Arc<EventLog>,
    topic: String,
    group: String,
    handler: Arc<dyn EventHandler>,
    policy: RetryPolicy,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
}

impl ConsumerWorker {
    pub fn new(
        log: Arc<EventLog>,
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        policy: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            log,
            topic: topic.into(),
            group: group.into(),
            handler,
            policy,
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Process every currently unacknowledged record once, in partition
    /// order. Returns the number of records that were acknowledged
    /// (successfully handled or dead-lettered).
    pub async fn poll_once(&self) -> usize {
        let mut processed = 0;
        for partition in 0..self.log.partition_count() {
            loop {
                let offset = self.log.committed_offset(&self.group, &self.topic, partition);
                let Some(record) = self.log.fetch(&self.topic, partition, offset) else {
                    break;
                };
                self.process_record(&record).await;
                self.log.commit_offset(&self.group, &self.topic, partition, offset);
                processed += 1;
            }
        }
        processed
    }

    /// Deliver one record to the handler, retrying with a fixed backoff.
    /// On exhausted retries the record moves to the dead-letter topic; the
    /// caller then commits the offset so the original consumer never sees
    /// it again.
    async fn process_record(&self, record: &Record) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.handler.handle(record).await {
                Ok(()) => {
                    debug!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        group = %self.group,
                        "record acknowledged"
                    );
                    return;
                }
                Err(e) if attempts < self.policy.max_attempts => {
                    warn!(
                        topic = %record.topic,
                        offset = record.offset,
                        group = %self.group,
                        attempt = attempts,
                        error = %e,
                        "handler failed, redelivering after backoff"
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    error!(
                        topic = %record.topic,
                        offset = record.offset,
                        group = %self.group,
                        attempts,
                        error = %e,
                        "retry budget exhausted, routing to dead-letter"
                    );
                    self.dead_letter(record, attempts, &e.to_string());
                    return;
                }
            }
        }
    }

    fn dead_letter(&self, record: &Record, attempts: u32, last_error: &str) {
        let entry = DeadLetter {
            original_topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: record.key.clone(),
            payload: record.payload.clone(),
            consumer_group: self.group.clone(),
            attempts,
            last_error: last_error.to_string(),
        };
        if let Err(e) = self.log.publish(topics::DEAD_LETTER, &record.key, &entry) {
            // Nothing left to do but scream; the offset still advances so
            // the partition is not wedged.
            error!(error = %e, "failed to append dead-letter record");
        }
    }

    /// Run the polling loop until the stop flag clears.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let worker = self;
        tokio::spawn(async move {
            info!(topic = %worker.topic, group = %worker.group, "consumer worker started");
            while worker.running.load(Ordering::SeqCst) {
                let processed = worker.poll_once().await;
                if processed == 0 {
                    tokio::time::sleep(worker.poll_interval).await;
                }
            }
            info!(topic = %worker.topic, group = %worker.group, "consumer worker stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
