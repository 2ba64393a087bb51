use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use todo_api::{ConsumedMessage, Delivery};

use crate::error::TopicError;
use crate::partitioner::{RoundRobin, partition_for_key};

// A panic while holding one of these locks cannot leave a log half-written
// (appends are a single push), so poisoned guards are taken as-is.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ═══════════════════════════════════════════════════════════════
//  StoredRecord
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Vec<u8>,
    value: Vec<u8>,
    timestamp_ms: i64,
}

// ═══════════════════════════════════════════════════════════════
//  Topic
// ═══════════════════════════════════════════════════════════════

/// A named, partitioned, append-only log. The offset of a record is its
/// index in its partition, so offsets start at 0 and never have gaps.
pub struct Topic {
    pub name: String,
    partitions: Vec<RwLock<Vec<StoredRecord>>>,
    unkeyed: RoundRobin,
}

impl Topic {
    pub fn new(name: String, partitions: i32) -> Result<Self, TopicError> {
        if partitions < 1 {
            return Err(TopicError::NoPartitions(name));
        }
        Ok(Self {
            name,
            partitions: (0..partitions).map(|_| RwLock::new(Vec::new())).collect(),
            unkeyed: RoundRobin::default(),
        })
    }

    pub fn partition_count(&self) -> i32 {
        self.partitions.len() as i32
    }

    /// Append a record, choosing the partition from the key.
    pub fn append(&self, key: &[u8], value: &[u8], timestamp_ms: i64) -> Delivery {
        let count = self.partition_count();
        let partition = if key.is_empty() {
            self.unkeyed.next(count)
        } else {
            partition_for_key(key, count)
        };

        let mut log = write(&self.partitions[partition as usize]);
        let offset = log.len() as i64;
        log.push(StoredRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            timestamp_ms,
        });
        Delivery { partition, offset }
    }

    /// Record at `offset`, or `None` past the end of the partition.
    pub fn read(&self, partition: i32, offset: i64) -> Result<Option<ConsumedMessage>, TopicError> {
        let log = self.partition(partition)?;
        let log = read(log);
        if offset < 0 {
            return Ok(None);
        }
        Ok(log.get(offset as usize).map(|r| ConsumedMessage {
            topic: self.name.clone(),
            partition,
            offset,
            key: r.key.clone(),
            value: r.value.clone(),
            timestamp_ms: r.timestamp_ms,
        }))
    }

    /// Next offset to be written in `partition` (the high watermark).
    pub fn len(&self, partition: i32) -> Result<i64, TopicError> {
        Ok(read(self.partition(partition)?).len() as i64)
    }

    fn partition(&self, partition: i32) -> Result<&RwLock<Vec<StoredRecord>>, TopicError> {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.partitions.get(p))
            .ok_or_else(|| TopicError::PartitionOutOfRange {
                topic: self.name.clone(),
                partition,
            })
    }
}

// ═══════════════════════════════════════════════════════════════
//  TopicRegistry
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic. Creating an existing topic with the same partition
    /// count is a no-op.
    pub fn create(&self, name: &str, partitions: i32) -> Result<Arc<Topic>, TopicError> {
        let mut topics = write(&self.topics);
        if let Some(existing) = topics.get(name) {
            if existing.partition_count() == partitions {
                return Ok(Arc::clone(existing));
            }
            return Err(TopicError::AlreadyExists {
                name: name.to_string(),
                partitions: existing.partition_count(),
            });
        }
        let topic = Arc::new(Topic::new(name.to_string(), partitions)?);
        topics.insert(name.to_string(), Arc::clone(&topic));
        tracing::info!(topic = %name, partitions, "topic created");
        Ok(topic)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Topic>, TopicError> {
        read(&self.topics)
            .get(name)
            .cloned()
            .ok_or_else(|| TopicError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.topics).keys().cloned().collect();
        names.sort();
        names
    }
}
