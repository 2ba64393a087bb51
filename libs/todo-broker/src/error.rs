use todo_api::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("topic '{0}' not found")]
    NotFound(String),

    #[error("topic '{name}' already exists with {partitions} partitions")]
    AlreadyExists { name: String, partitions: i32 },

    #[error("topic '{0}' must have at least one partition")]
    NoPartitions(String),

    #[error("topic '{topic}' has no partition {partition}")]
    PartitionOutOfRange { topic: String, partition: i32 },
}

impl TopicError {
    /// Convert to BrokerError. Every topic error is permanent: retrying the
    /// same request against the same topic layout cannot succeed.
    pub fn into_broker_error(self) -> BrokerError {
        BrokerError::permanent(self.to_string())
    }
}

impl From<TopicError> for BrokerError {
    fn from(e: TopicError) -> Self {
        e.into_broker_error()
    }
}
