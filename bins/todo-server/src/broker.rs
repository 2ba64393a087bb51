use std::sync::Arc;

use todo_api::{BrokerProducer, GroupClient};
use todo_broker::MemoryBroker;

use crate::config::{BrokerBackend, ServerConfig};
use crate::error::ServerError;

/// Client handles shared by the API and the reader.
#[derive(Clone)]
pub struct BrokerClients {
    pub producer: Arc<dyn BrokerProducer>,
    pub groups: Arc<dyn GroupClient>,
}

/// Connect to the configured backend and make sure the command topics exist.
pub async fn connect(config: &ServerConfig) -> Result<BrokerClients, ServerError> {
    if !config.kafka.zookeepers.is_empty() {
        tracing::info!(zookeepers = %config.kafka.zookeepers.join(","), "coordination addresses configured, not used");
    }
    match config.kafka.backend {
        BrokerBackend::Memory => connect_memory(config),
        BrokerBackend::Kafka => connect_kafka(config).await,
    }
}

fn connect_memory(config: &ServerConfig) -> Result<BrokerClients, ServerError> {
    let broker = MemoryBroker::new();
    for (_, topic) in config.kafka_topics.iter() {
        broker.create_topic(&topic.topic_name, topic.partitions)?;
        tracing::info!(topic = %topic.topic_name, partitions = topic.partitions, "topic created");
    }
    tracing::info!("using embedded broker");
    Ok(BrokerClients {
        producer: Arc::new(broker.clone()),
        groups: Arc::new(broker),
    })
}

#[cfg(feature = "kafka")]
async fn connect_kafka(config: &ServerConfig) -> Result<BrokerClients, ServerError> {
    use todo_broker::kafka::{KafkaGroupClient, KafkaProducer, TopicSpec, ensure_topics};

    let brokers = &config.kafka.brokers;
    let specs: Vec<TopicSpec> = config
        .kafka_topics
        .iter()
        .map(|(_, t)| TopicSpec {
            name: t.topic_name.clone(),
            partitions: t.partitions,
            replication_factor: t.replication_factor,
        })
        .collect();
    ensure_topics(brokers, &specs).await?;

    let producer = KafkaProducer::new(brokers, config.producer.acks, config.producer.request_timeout())?;
    tracing::info!(brokers = %brokers.join(","), "connected to kafka");
    Ok(BrokerClients {
        producer: Arc::new(producer),
        groups: Arc::new(KafkaGroupClient::new(brokers.clone())),
    })
}

#[cfg(not(feature = "kafka"))]
async fn connect_kafka(_config: &ServerConfig) -> Result<BrokerClients, ServerError> {
    Err(ServerError::Config {
        context: "kafka.backend",
        detail: "kafka backend selected but this build lacks the `kafka` feature".into(),
    })
}

#[cfg(test)]
mod tests {
    use todo_api::{Acks, Envelope};

    use super::*;

    #[tokio::test]
    async fn memory_backend_creates_configured_topics() {
        let raw = "[kafka_topics.todo_create]\ntopic_name = \"c\"\npartitions = 2\n";
        let config = ServerConfig::parse(raw, "inline").unwrap();
        let clients = connect(&config).await.unwrap();

        let delivery = clients
            .producer
            .produce(&Envelope::new("c", b"k".to_vec(), b"v".to_vec()), Acks::All)
            .await
            .unwrap();
        assert!((0..2).contains(&delivery.partition));
        assert_eq!(delivery.offset, 0);

        let unknown = clients
            .producer
            .produce(&Envelope::new("missing", b"k".to_vec(), b"v".to_vec()), Acks::All)
            .await
            .unwrap_err();
        assert!(!unknown.is_transient());
    }
}
