//! Durable, partitioned, ordered event log (in-process).
//!
//! Records are appended to `hash(key) % partitions` and retained; consumer
//! groups track committed offsets here, so an uncommitted record is
//! redelivered to a restarted consumer (at-least-once, never at-most-once).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use chrono::Utc;
use serde::Serialize;
use tracing::trace;

use crate::error::Result;

use super::Record;

struct TopicLog {
    partitions: Vec<Vec<Record>>,
}

impl TopicLog {
    fn new(partition_count: u32) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| Vec::new()).collect(),
        }
    }
}

/// The event log shared by producers and consumer workers.
pub struct EventLog {
    partition_count: u32,
    topics: RwLock<HashMap<String, TopicLog>>,
    /// Committed offset per (group, topic, partition): the next offset the
    /// group will consume.
    committed: RwLock<HashMap<(String, String, u32), u64>>,
}

impl EventLog {
    pub fn new(partition_count: u32) -> Self {
        assert!(partition_count > 0, "at least one partition required");
        Self {
            partition_count,
            topics: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Which partition a key routes to. Stable for the life of the log, so
    /// all events for one key land on one ordered sub-stream.
    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partition_count)) as u32
    }

    /// Append an event to the topic partition selected by `key`. Returns
    /// (partition, offset).
    pub fn publish<T: Serialize>(&self, topic: &str, key: &str, event: &T) -> Result<(u32, u64)> {
        let payload = serde_json::to_value(event)?;
        let partition = self.partition_for(key);

        let mut topics = self.topics.write().expect("event log lock poisoned");
        let topic_log = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(self.partition_count));

        let log = &mut topic_log.partitions[partition as usize];
        let offset = log.len() as u64;
        log.push(Record {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload,
            published_at: Utc::now(),
        });

        trace!(topic, partition, offset, key, "record appended");
        Ok((partition, offset))
    }

    /// Fetch the record at `offset`, if it exists yet.
    pub fn fetch(&self, topic: &str, partition: u32, offset: u64) -> Option<Record> {
        let topics = self.topics.read().expect("event log lock poisoned");
        topics
            .get(topic)?
            .partitions
            .get(partition as usize)?
            .get(offset as usize)
            .cloned()
    }

    /// Number of records appended to a partition so far.
    pub fn high_water_mark(&self, topic: &str, partition: u32) -> u64 {
        let topics = self.topics.read().expect("event log lock poisoned");
        topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
            .map_or(0, |p| p.len() as u64)
    }

    /// All records of a topic across partitions, in append order per
    /// partition. Operator inspection (dead-letter topic) and tests.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        let topics = self.topics.read().expect("event log lock poisoned");
        topics.get(topic).map_or_else(Vec::new, |t| {
            t.partitions.iter().flatten().cloned().collect()
        })
    }

    /// Next offset the group will consume from a partition.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> u64 {
        let committed = self.committed.read().expect("event log lock poisoned");
        committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    /// Acknowledge everything up to and including `offset` for the group.
    pub fn commit_offset(&self, group: &str, topic: &str, partition: u32, offset: u64) {
        let mut committed = self.committed.write().expect("event log lock poisoned");
        committed.insert((group.to_string(), topic.to_string(), partition), offset + 1);
    }

    /// Records the group has not yet acknowledged, per partition order.
    pub fn uncommitted(&self, group: &str, topic: &str, partition: u32) -> Vec<Record> {
        let mut records = Vec::new();
        let mut offset = self.committed_offset(group, topic, partition);
        while let Some(record) = self.fetch(topic, partition, offset) {
            records.push(record);
            offset += 1;
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_key_routes_to_same_partition() {
        let log = EventLog::new(3);
        let p1 = log.partition_for("buyer-1");
        let p2 = log.partition_for("buyer-1");
        assert_eq!(p1, p2);
    }

    #[test]
    fn per_key_ordering_is_preserved() {
        let log = EventLog::new(3);
        for i in 0..10 {
            log.publish("order.placed", "buyer-1", &json!({ "seq": i })).unwrap();
        }
        let partition = log.partition_for("buyer-1");
        let seqs: Vec<u64> = (0..10)
            .map(|o| log.fetch("order.placed", partition, o).unwrap().payload["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn committed_offsets_are_per_group() {
        let log = EventLog::new(1);
        log.publish("t", "k", &json!(1)).unwrap();
        log.publish("t", "k", &json!(2)).unwrap();

        log.commit_offset("group-a", "t", 0, 0);
        assert_eq!(log.committed_offset("group-a", "t", 0), 1);
        assert_eq!(log.committed_offset("group-b", "t", 0), 0);
        assert_eq!(log.uncommitted("group-a", "t", 0).len(), 1);
        assert_eq!(log.uncommitted("group-b", "t", 0).len(), 2);
    }
}
