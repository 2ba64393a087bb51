//! Broker client seams.
//!
//! The pipeline only talks to the broker through these traits. Concrete
//! clients (embedded in-memory broker, Kafka) are constructed explicitly and
//! injected, so tests run against a fake broker with no process-wide state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;

use crate::envelope::{ConsumedMessage, Delivery, Envelope, TopicPartition};
use crate::error::BrokerError;

pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// How many replicas must acknowledge a write before it counts as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acks {
    /// Fire and forget.
    None,
    /// Partition leader only.
    Leader,
    /// Every in-sync replica.
    #[default]
    All,
}

/// Publish side. Must be safe for concurrent use without caller locking.
pub trait BrokerProducer: Send + Sync {
    /// Send one record and wait for the acknowledgement demanded by `acks`.
    /// Performs a single attempt; retries are the caller's concern.
    fn produce<'a>(&'a self, envelope: &'a Envelope, acks: Acks) -> BrokerFuture<'a, Delivery>;

    /// Flush anything buffered and release connections.
    fn close(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Consume side: entry point into consumer groups.
pub trait GroupClient: Send + Sync {
    /// Register as a member of `group_id` subscribed to `topics`.
    ///
    /// Partition assignment is performed by the broker; the first
    /// [`SessionEvent::Assigned`] is delivered by [`GroupSession::poll`].
    fn join<'a>(&'a self, group_id: &'a str, topics: &'a [String]) -> BrokerFuture<'a, Arc<dyn GroupSession>>;
}

/// What a group member observes when polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A (re)balance completed; the member now owns exactly `partitions`.
    Assigned { generation: u64, partitions: Vec<TopicPartition> },
    /// Next record of an owned partition, in partition order.
    Message(ConsumedMessage),
    /// The session has left the group. No further events.
    Closed,
}

/// Membership of one consumer in one group.
pub trait GroupSession: Send + Sync {
    fn member_id(&self) -> &str;

    /// Wait for the next event. Must be cancel-safe: dropping the future
    /// before it resolves loses no record.
    fn poll(&self) -> BrokerFuture<'_, SessionEvent>;

    /// Record that everything up to and including `offset` on `partition`
    /// was processed. The broker never moves a cursor backwards.
    fn commit<'a>(&'a self, partition: &'a TopicPartition, offset: i64) -> BrokerFuture<'a, ()>;

    /// Leave the group so the remaining members can take over immediately.
    fn leave(&self) -> BrokerFuture<'_, ()>;
}
