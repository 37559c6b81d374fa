//! `myshop.dlt` monitor (group `dlt-monitor`).
//!
//! The dead-letter topic is a terminal sink; this consumer only surfaces
//! parked records to the log for operator attention. It must never fail:
//! a failing handler here would dead-letter the dead letter.

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::Result;
use crate::pipeline::{DeadLetter, EventHandler, Record};

#[derive(Default)]
pub struct DeadLetterMonitor;

impl DeadLetterMonitor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for DeadLetterMonitor {
    async fn handle(&self, record: &Record) -> Result<()> {
        match record.payload_as::<DeadLetter>() {
            Ok(dead) => {
                error!(
                    original_topic = %dead.original_topic,
                    partition = dead.partition,
                    offset = dead.offset,
                    group = %dead.consumer_group,
                    attempts = dead.attempts,
                    last_error = %dead.last_error,
                    "record parked on dead-letter topic"
                );
            }
            Err(e) => {
                warn!(offset = record.offset, error = %e, "unparseable dead-letter record");
            }
        }
        Ok(())
    }
}
