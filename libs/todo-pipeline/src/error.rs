use todo_api::{BrokerError, DecodeError, EncodeError, ValidationError};

/// Broker refused or never acknowledged a record, after the producer's
/// internal retries were spent.
#[derive(Debug, thiserror::Error)]
#[error("publish to '{topic}' failed after {attempts} attempt(s): {source}")]
pub struct PublishError {
    pub topic: String,
    pub attempts: u32,
    #[source]
    pub source: BrokerError,
}

impl PublishError {
    /// Whether the last failure was transient (broker down, timeout) as
    /// opposed to a rejection that would fail again.
    pub fn is_transient(&self) -> bool {
        self.source.is_transient()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("commit {topic}/{partition}@{offset} failed: {source}")]
pub struct CommitError {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    #[source]
    pub source: BrokerError,
}

/// Failure of a command handler, surfaced synchronously to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("join group '{group}' failed: {source}")]
    Join {
        group: String,
        #[source]
        source: BrokerError,
    },

    #[error("no topics to subscribe for group '{0}'")]
    NoTopics(String),
}

/// Failure reported by a per-topic message action.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a consumed message could not be processed.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("handler did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("topic '{0}' is assigned to more than one command kind")]
    DuplicateTopic(String),
}
