//! Kafka-backed broker clients (feature `kafka`).
//!
//! Producer: `FutureProducer`, snappy compression, acks fixed at
//! construction. Consumer: one `StreamConsumer` per group session with
//! manual commits; rebalance callbacks are surfaced as
//! [`SessionEvent::Assigned`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::{Mutex, mpsc};

use todo_api::{
    Acks, BrokerError, BrokerFuture, BrokerProducer, ConsumedMessage, Delivery, Envelope,
    GroupClient, GroupSession, SessionEvent, TopicPartition, now_ms,
};

use crate::ledger::CommitLedger;

fn map_error(e: KafkaError) -> BrokerError {
    let kind = e.rdkafka_error_code();
    let message = e.to_string();
    match kind {
        Some(
            RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessage,
        ) => BrokerError::permanent(message),
        Some(
            RDKafkaErrorCode::RebalanceInProgress
            | RDKafkaErrorCode::IllegalGeneration
            | RDKafkaErrorCode::UnknownMemberId,
        ) => BrokerError::rebalancing(message),
        _ => BrokerError::transient(message),
    }
}

fn acks_value(acks: Acks) -> &'static str {
    match acks {
        Acks::None => "0",
        Acks::Leader => "1",
        Acks::All => "all",
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaProducer
// ═══════════════════════════════════════════════════════════════

pub struct KafkaProducer {
    producer: FutureProducer,
    acks: Acks,
    timeout: Duration,
}

impl KafkaProducer {
    pub fn new(brokers: &[String], acks: Acks, timeout: Duration) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("acks", acks_value(acks))
            .set("compression.type", "snappy")
            .set("message.timeout.ms", timeout.as_millis().to_string())
            // Retries are driven by the pipeline producer.
            .set("retries", "0")
            .create()
            .map_err(map_error)?;
        tracing::info!(brokers = %brokers.join(","), acks = acks_value(acks), "kafka producer created");
        Ok(Self { producer, acks, timeout })
    }
}

impl BrokerProducer for KafkaProducer {
    fn produce<'a>(&'a self, envelope: &'a Envelope, acks: Acks) -> BrokerFuture<'a, Delivery> {
        Box::pin(async move {
            if acks != self.acks {
                tracing::debug!(
                    requested = acks_value(acks),
                    configured = acks_value(self.acks),
                    "acks level is fixed per producer, using configured value",
                );
            }
            let record = FutureRecord::to(envelope.topic())
                .key(envelope.key())
                .payload(envelope.value())
                .timestamp(envelope.timestamp_ms());
            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => Ok(Delivery { partition, offset }),
                Err((e, _)) => Err(map_error(e)),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic administration
// ═══════════════════════════════════════════════════════════════

/// Topic to create on startup.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

/// Create missing topics. Existing topics are left untouched.
pub async fn ensure_topics(brokers: &[String], topics: &[TopicSpec]) -> Result<(), BrokerError> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers.join(","))
        .create()
        .map_err(map_error)?;

    let new_topics: Vec<NewTopic<'_>> = topics
        .iter()
        .map(|t| NewTopic::new(&t.name, t.partitions, TopicReplication::Fixed(t.replication_factor)))
        .collect();

    let results = admin
        .create_topics(&new_topics, &AdminOptions::new())
        .await
        .map_err(map_error)?;

    for result in results {
        match result {
            Ok(name) => tracing::info!(topic = %name, "topic created"),
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                tracing::debug!(topic = %name, "topic already exists");
            }
            Err((name, code)) => {
                return Err(BrokerError::permanent(format!("create topic '{name}': {code}")));
            }
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  KafkaGroupClient
// ═══════════════════════════════════════════════════════════════

pub struct KafkaGroupClient {
    brokers: Vec<String>,
}

impl KafkaGroupClient {
    pub fn new(brokers: Vec<String>) -> Self {
        Self { brokers }
    }
}

struct RebalanceContext {
    events: mpsc::UnboundedSender<Vec<TopicPartition>>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let partitions = match rebalance {
            Rebalance::Assign(tpl) => tpl
                .elements()
                .iter()
                .map(|e| TopicPartition::new(e.topic(), e.partition()))
                .collect(),
            Rebalance::Revoke(_) => Vec::new(),
            Rebalance::Error(e) => {
                tracing::warn!(error = %e, "rebalance failed");
                return;
            }
        };
        // Receiver gone means the session is shutting down.
        let _ = self.events.send(partitions);
    }
}

impl GroupClient for KafkaGroupClient {
    fn join<'a>(&'a self, group_id: &'a str, topics: &'a [String]) -> BrokerFuture<'a, Arc<dyn GroupSession>> {
        Box::pin(async move {
            let member_id = format!("{group_id}-{}", uuid::Uuid::new_v4());
            let (tx, rx) = mpsc::unbounded_channel();
            let consumer: StreamConsumer<RebalanceContext> = ClientConfig::new()
                .set("bootstrap.servers", self.brokers.join(","))
                .set("group.id", group_id)
                .set("client.id", &member_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .create_with_context(RebalanceContext { events: tx })
                .map_err(map_error)?;

            let names: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer.subscribe(&names).map_err(map_error)?;
            tracing::info!(group = %group_id, member = %member_id, topics = ?topics, "subscribed");

            Ok(Arc::new(KafkaSession {
                consumer: Arc::new(consumer),
                member_id,
                events: Mutex::new(rx),
                generation: AtomicU64::new(0),
                committed: CommitLedger::default(),
                left: AtomicBool::new(false),
            }) as Arc<dyn GroupSession>)
        })
    }
}

pub struct KafkaSession {
    consumer: Arc<StreamConsumer<RebalanceContext>>,
    member_id: String,
    events: Mutex<mpsc::UnboundedReceiver<Vec<TopicPartition>>>,
    generation: AtomicU64,
    committed: CommitLedger,
    left: AtomicBool,
}

impl GroupSession for KafkaSession {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn poll(&self) -> BrokerFuture<'_, SessionEvent> {
        Box::pin(async move {
            if self.left.load(Ordering::SeqCst) {
                return Ok(SessionEvent::Closed);
            }
            let mut events = self.events.lock().await;
            tokio::select! {
                biased;
                Some(partitions) = events.recv() => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(SessionEvent::Assigned { generation, partitions })
                }
                message = self.consumer.recv() => {
                    let m = message.map_err(map_error)?;
                    Ok(SessionEvent::Message(ConsumedMessage {
                        topic: m.topic().to_string(),
                        partition: m.partition(),
                        offset: m.offset(),
                        key: m.key().unwrap_or_default().to_vec(),
                        value: m.payload().unwrap_or_default().to_vec(),
                        timestamp_ms: m.timestamp().to_millis().unwrap_or_else(now_ms),
                    }))
                }
            }
        })
    }

    fn commit<'a>(&'a self, partition: &'a TopicPartition, offset: i64) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            if self.left.load(Ordering::SeqCst) {
                return Err(BrokerError::closed(format!("member '{}' has left", self.member_id)));
            }
            let owned = self.consumer.assignment().map_err(map_error)?;
            if owned.find_partition(&partition.topic, partition.partition).is_none() {
                return Err(BrokerError::rebalancing(format!(
                    "partition {partition} is not assigned to member '{}'",
                    self.member_id
                )));
            }
            let consumer = Arc::clone(&self.consumer);
            self.committed
                .advance(partition, offset, |target| async move {
                    let mut tpl = TopicPartitionList::new();
                    tpl.add_partition_offset(&partition.topic, partition.partition, Offset::Offset(target))
                        .map_err(map_error)?;
                    tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
                        .await
                        .map_err(|e| BrokerError::transient(format!("commit task failed: {e}")))?
                        .map_err(map_error)
                })
                .await
        })
    }

    fn leave(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            if !self.left.swap(true, Ordering::SeqCst) {
                self.consumer.unsubscribe();
                tracing::info!(member = %self.member_id, "left consumer group");
            }
            Ok(())
        })
    }
}
