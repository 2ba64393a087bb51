use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use todo_api::{Acks, CommandKind};

use crate::error::ConfigError;

// ═══════════════════════════════════════════════════════════════
//  Producer Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Acknowledgement level demanded from the broker.
    #[serde(default)]
    pub acks: Acks,
    /// Total attempts per record, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
    /// Upper bound on a single attempt, acknowledgement included.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}
fn default_retry_backoff_max_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            acks: Acks::default(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ProducerConfig {
    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self.retry_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(ms.min(self.retry_backoff_max_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero("producer.max_attempts"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Zero("producer.request_timeout_ms"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    pub topic_name: String,
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
}

fn default_partitions() -> i32 {
    3
}
fn default_replication_factor() -> i32 {
    1
}

impl TopicConfig {
    pub fn new(topic_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            partitions: default_partitions(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// One topic per command kind.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_create_topic")]
    pub todo_create: TopicConfig,
    #[serde(default = "default_update_topic")]
    pub todo_update: TopicConfig,
    #[serde(default = "default_delete_topic")]
    pub todo_delete: TopicConfig,
}

fn default_create_topic() -> TopicConfig {
    TopicConfig::new("todoCreate")
}
fn default_update_topic() -> TopicConfig {
    TopicConfig::new("todoUpdate")
}
fn default_delete_topic() -> TopicConfig {
    TopicConfig::new("todoDelete")
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            todo_create: default_create_topic(),
            todo_update: default_update_topic(),
            todo_delete: default_delete_topic(),
        }
    }
}

impl TopicsConfig {
    pub fn get(&self, kind: CommandKind) -> &TopicConfig {
        match kind {
            CommandKind::Create => &self.todo_create,
            CommandKind::Update => &self.todo_update,
            CommandKind::Delete => &self.todo_delete,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CommandKind, &TopicConfig)> {
        CommandKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (_, topic) in self.iter() {
            if topic.topic_name.trim().is_empty() {
                return Err(ConfigError::Empty("kafka_topics.*.topic_name"));
            }
            if topic.partitions < 1 {
                return Err(ConfigError::Zero("kafka_topics.*.partitions"));
            }
            if topic.replication_factor < 1 {
                return Err(ConfigError::Zero("kafka_topics.*.replication_factor"));
            }
            if !seen.insert(topic.topic_name.as_str()) {
                return Err(ConfigError::DuplicateTopic(topic.topic_name.clone()));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Reader Config
// ═══════════════════════════════════════════════════════════════

/// What to do with a message whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log and commit anyway: the message is treated as consumed.
    #[default]
    Commit,
    /// Log and hold the partition's group cursor at this message, so the
    /// next owner redelivers it. Later messages on the partition are still
    /// processed now and redelivered along with it.
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Per-message deadline for the topic action. Unset means none.
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,
    /// How long shutdown waits for in-flight messages before aborting.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_pool_size() -> usize {
    30
}
fn default_drain_timeout_ms() -> u64 {
    5000
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            failure_policy: FailurePolicy::default(),
            handler_timeout_ms: None,
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl ReaderConfig {
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Zero("reader.pool_size"));
        }
        if self.handler_timeout_ms == Some(0) {
            return Err(ConfigError::Zero("reader.handler_timeout_ms"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_tables() {
        let producer: ProducerConfig = toml::from_str("").unwrap();
        assert_eq!(producer.acks, Acks::All);
        assert_eq!(producer.max_attempts, 3);

        let reader: ReaderConfig = toml::from_str("").unwrap();
        assert_eq!(reader.pool_size, 30);
        assert_eq!(reader.failure_policy, FailurePolicy::Commit);
        assert_eq!(reader.handler_timeout(), None);

        let topics: TopicsConfig = toml::from_str("").unwrap();
        assert_eq!(topics.get(CommandKind::Delete).topic_name, "todoDelete");
        assert_eq!(topics.todo_create.partitions, 3);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let cfg = ProducerConfig {
            retry_backoff_ms: 100,
            retry_backoff_max_ms: 300,
            ..ProducerConfig::default()
        };
        assert_eq!(cfg.backoff(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff(3), Duration::from_millis(300));
        assert_eq!(cfg.backoff(40), Duration::from_millis(300));
    }

    #[test]
    fn parses_policy_and_acks() {
        let reader: ReaderConfig = toml::from_str(
            r#"
            pool_size = 4
            failure_policy = "skip"
            handler_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(reader.failure_policy, FailurePolicy::Skip);
        assert_eq!(reader.handler_timeout(), Some(Duration::from_millis(250)));

        let producer: ProducerConfig = toml::from_str(r#"acks = "leader""#).unwrap();
        assert_eq!(producer.acks, Acks::Leader);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let reader = ReaderConfig { pool_size: 0, ..ReaderConfig::default() };
        assert_eq!(reader.validate(), Err(ConfigError::Zero("reader.pool_size")));

        let producer = ProducerConfig { max_attempts: 0, ..ProducerConfig::default() };
        assert_eq!(producer.validate(), Err(ConfigError::Zero("producer.max_attempts")));

        let mut topics = TopicsConfig::default();
        topics.todo_update.topic_name = "todoCreate".into();
        assert_eq!(topics.validate(), Err(ConfigError::DuplicateTopic("todoCreate".into())));

        let mut topics = TopicsConfig::default();
        topics.todo_delete.partitions = 0;
        assert!(topics.validate().is_err());
    }
}
