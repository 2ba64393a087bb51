use std::sync::Arc;

use todo_api::{BrokerError, BrokerProducer, Delivery, Envelope};

use crate::config::ProducerConfig;
use crate::error::PublishError;

/// Synchronous publisher over a shared broker client.
///
/// Each call waits for the configured acknowledgement. Transient failures
/// are retried internally with exponential backoff up to
/// `max_attempts`; anything else is returned at once. Safe to share
/// between concurrent callers: it holds no mutable state of its own.
pub struct Producer {
    client: Arc<dyn BrokerProducer>,
    config: ProducerConfig,
}

impl Producer {
    pub fn new(client: Arc<dyn BrokerProducer>, config: ProducerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Publish `value` to `topic` under `key`.
    pub async fn publish(
        &self,
        topic: &str,
        key: impl Into<Vec<u8>>,
        value: Vec<u8>,
    ) -> Result<Delivery, PublishError> {
        self.send(&Envelope::new(topic, key, value)).await
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<Delivery, PublishError> {
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = self.config.request_timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, self.client.produce(envelope, self.config.acks)).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::transient(format!(
                    "no acknowledgement within {}ms",
                    timeout.as_millis()
                ))),
            };

            match result {
                Ok(delivery) => {
                    tracing::debug!(
                        topic = %envelope.topic(),
                        partition = delivery.partition,
                        offset = delivery.offset,
                        attempt,
                        "published",
                    );
                    return Ok(delivery);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        topic = %envelope.topic(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "publish failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        topic = %envelope.topic(),
                        attempts = attempt,
                        kind = %e.kind(),
                        error = %e,
                        "publish failed",
                    );
                    return Err(PublishError {
                        topic: envelope.topic().to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// Flush and release the underlying client.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use todo_api::{Acks, BrokerErrorKind, BrokerFuture};
    use todo_broker::MemoryBroker;

    use super::*;

    fn fast_config() -> ProducerConfig {
        ProducerConfig {
            max_attempts: 3,
            retry_backoff_ms: 1,
            retry_backoff_max_ms: 5,
            request_timeout_ms: 50,
            ..ProducerConfig::default()
        }
    }

    fn setup() -> (MemoryBroker, Producer) {
        let broker = MemoryBroker::new();
        broker.create_topic("todoCreate", 3).unwrap();
        let producer = Producer::new(Arc::new(broker.clone()), fast_config());
        (broker, producer)
    }

    #[tokio::test]
    async fn successive_publishes_on_one_partition_increase() {
        let (_, producer) = setup();
        let first = producer.publish("todoCreate", "a1", b"x".to_vec()).await.unwrap();
        let second = producer.publish("todoCreate", "a1", b"y".to_vec()).await.unwrap();
        assert_eq!(first.partition, second.partition);
        assert!(second.offset > first.offset);
    }

    #[tokio::test]
    async fn unreachable_broker_gives_up_after_max_attempts() {
        let (broker, producer) = setup();
        broker.set_unreachable(true);

        let err = producer.publish("todoCreate", "a1", b"x".to_vec()).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(err.is_transient());
        assert_eq!(broker.produce_attempts(), 3);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (broker, producer) = setup();
        broker.fail_next_produces(2);

        let delivery = producer.publish("todoCreate", "a1", b"x".to_vec()).await.unwrap();
        assert_eq!(delivery.offset, 0);
        assert_eq!(broker.produce_attempts(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let (broker, producer) = setup();
        let err = producer.publish("missing", "a1", b"x".to_vec()).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.source.kind(), BrokerErrorKind::Permanent);
        assert_eq!(broker.produce_attempts(), 1);
    }

    struct Silent {
        calls: AtomicU32,
    }

    impl BrokerProducer for Silent {
        fn produce<'a>(&'a self, _envelope: &'a Envelope, _acks: Acks) -> BrokerFuture<'a, Delivery> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn missing_acknowledgement_times_out_each_attempt() {
        let silent = Arc::new(Silent { calls: AtomicU32::new(0) });
        let producer = Producer::new(silent.clone(), fast_config());

        let err = producer.publish("todoCreate", "a1", b"x".to_vec()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.attempts, 3);
        assert_eq!(silent.calls.load(Ordering::SeqCst), 3);
    }
}
