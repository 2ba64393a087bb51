use std::fmt;

use crate::util::now_ms;

/// Transport wrapper around an encoded command.
///
/// Immutable once built; owned by the producer call that sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    topic: String,
    key: Vec<u8>,
    value: Vec<u8>,
    timestamp_ms: i64,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, value: Vec<u8>) -> Self {
        Self::with_timestamp(topic, key, value, now_ms())
    }

    pub fn with_timestamp(
        topic: impl Into<String>,
        key: impl Into<Vec<u8>>,
        value: Vec<u8>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value,
            timestamp_ms,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Where the broker stored a published record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self { topic: topic.into(), partition }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// A record delivered to a consumer group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp_ms: i64,
}

impl ConsumedMessage {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}
