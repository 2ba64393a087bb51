//! Consumer group coordinator.
//!
//! Wraps one group session and turns its event stream into a pull API
//! shared by all workers:
//!
//! ```text
//! Joining → Assigned → Streaming → (Rebalancing → Assigned) → Closing → Closed
//! ```
//!
//! Partition assignment belongs to the broker; the coordinator only
//! observes it. Commits are gated so that closing waits for in-flight
//! commits before membership is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

use todo_api::{BrokerError, BrokerErrorKind, ConsumedMessage, GroupClient, GroupSession, SessionEvent, TopicPartition};

use crate::error::{CommitError, CoordinatorError};

/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Joining,
    Assigned,
    Streaming,
    Rebalancing,
    Closing,
    Closed,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordinatorState::Joining => "joining",
            CoordinatorState::Assigned => "assigned",
            CoordinatorState::Streaming => "streaming",
            CoordinatorState::Rebalancing => "rebalancing",
            CoordinatorState::Closing => "closing",
            CoordinatorState::Closed => "closed",
        };
        f.write_str(s)
    }
}

pub struct Coordinator {
    group_id: String,
    session: Arc<dyn GroupSession>,
    state: watch::Sender<CoordinatorState>,
    generation: AtomicU64,
    assignment: Mutex<Vec<TopicPartition>>,
    // Lowest skipped offset per owned partition. Commits stay below it.
    skipped: Mutex<HashMap<TopicPartition, i64>>,
    // `true` once closing started. Commits hold the read side.
    commit_gate: RwLock<bool>,
}

impl Coordinator {
    /// Register membership in `group_id` subscribed to `topics`.
    pub async fn join(
        client: &dyn GroupClient,
        group_id: &str,
        topics: &[String],
    ) -> Result<Self, CoordinatorError> {
        if topics.is_empty() {
            return Err(CoordinatorError::NoTopics(group_id.to_string()));
        }
        tracing::info!(group = %group_id, topics = ?topics, "joining consumer group");

        let session = client.join(group_id, topics).await.map_err(|source| CoordinatorError::Join {
            group: group_id.to_string(),
            source,
        })?;
        tracing::info!(group = %group_id, member = %session.member_id(), "joined consumer group");

        let (state, _) = watch::channel(CoordinatorState::Joining);
        Ok(Self {
            group_id: group_id.to_string(),
            session,
            state,
            generation: AtomicU64::new(0),
            assignment: Mutex::new(Vec::new()),
            skipped: Mutex::new(HashMap::new()),
            commit_gate: RwLock::new(false),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn member_id(&self) -> &str {
        self.session.member_id()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Partitions owned in the current generation.
    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, next: CoordinatorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(group = %self.group_id, from = %previous, to = %next, "coordinator state");
        }
    }

    fn is_closing(&self) -> bool {
        matches!(self.state(), CoordinatorState::Closing | CoordinatorState::Closed)
    }

    /// Next message from an owned partition. Returns `None` once `token` is
    /// cancelled or the group session is closed.
    ///
    /// Safe to call from many workers at once; each message is handed to
    /// exactly one caller.
    pub async fn next_message(&self, token: &CancellationToken) -> Option<ConsumedMessage> {
        loop {
            if token.is_cancelled() || self.is_closing() {
                return None;
            }

            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                event = self.session.poll() => event,
            };

            match event {
                Ok(SessionEvent::Message(message)) => {
                    if self.state() != CoordinatorState::Streaming && !self.is_closing() {
                        self.set_state(CoordinatorState::Streaming);
                    }
                    return Some(message);
                }
                Ok(SessionEvent::Assigned { generation, partitions }) => {
                    self.on_assigned(generation, partitions);
                }
                Ok(SessionEvent::Closed) => {
                    self.set_state(CoordinatorState::Closed);
                    return None;
                }
                Err(e) if e.kind() == BrokerErrorKind::Closed => {
                    self.set_state(CoordinatorState::Closed);
                    return None;
                }
                Err(e) => {
                    tracing::warn!(group = %self.group_id, error = %e, "poll failed, retrying");
                    tokio::select! {
                        _ = token.cancelled() => return None,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    fn on_assigned(&self, generation: u64, partitions: Vec<TopicPartition>) {
        let previous = self.generation.swap(generation, Ordering::SeqCst);
        if previous != 0 {
            self.set_state(CoordinatorState::Rebalancing);
            tracing::info!(
                group = %self.group_id,
                from_generation = previous,
                to_generation = generation,
                "rebalance",
            );
        }
        tracing::info!(
            group = %self.group_id,
            member = %self.member_id(),
            generation,
            partitions = ?partitions.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "partitions assigned",
        );
        self.skipped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tp, _| partitions.contains(tp));
        *self.assignment.lock().unwrap_or_else(|e| e.into_inner()) = partitions;
        self.set_state(CoordinatorState::Assigned);
    }

    /// Leave `message` unprocessed: while this member owns the partition,
    /// no commit on it moves the group cursor past this offset, so the
    /// next member to own it starts here.
    pub fn skip(&self, message: &ConsumedMessage) {
        let mut skipped = self.skipped.lock().unwrap_or_else(|e| e.into_inner());
        let floor = skipped.entry(message.topic_partition()).or_insert(message.offset);
        *floor = (*floor).min(message.offset);
        tracing::debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = *floor,
            "cursor held at skipped message",
        );
    }

    /// Offset to commit for `message`: its own, or the one just below a
    /// skipped message on the same partition. `None` when nothing may be
    /// committed.
    fn commit_offset(&self, message: &ConsumedMessage) -> Option<i64> {
        let skipped = self.skipped.lock().unwrap_or_else(|e| e.into_inner());
        match skipped.get(&message.topic_partition()) {
            Some(&floor) if message.offset >= floor => (floor > 0).then(|| floor - 1),
            _ => Some(message.offset),
        }
    }

    /// Mark `message` and everything before it on its partition as processed.
    pub async fn commit(&self, message: &ConsumedMessage) -> Result<(), CommitError> {
        let gate = self.commit_gate.read().await;
        let err = |source: BrokerError| CommitError {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            source,
        };
        if *gate {
            return Err(err(BrokerError::closed("coordinator is closing")));
        }

        let Some(offset) = self.commit_offset(message) else {
            return Ok(());
        };
        self.session
            .commit(&message.topic_partition(), offset)
            .await
            .map_err(err)?;

        tracing::debug!(
            topic = %message.topic,
            partition = message.partition,
            offset,
            "committed",
        );
        Ok(())
    }

    /// Stop handing out messages, wait for in-flight commits, then leave
    /// the group so the remaining members pick up the partitions at once.
    pub async fn close(&self) {
        {
            let mut gate = self.commit_gate.write().await;
            if *gate {
                return;
            }
            *gate = true;
            self.set_state(CoordinatorState::Closing);
        }

        if let Err(e) = self.session.leave().await {
            tracing::warn!(group = %self.group_id, error = %e, "leave group failed");
        }
        self.set_state(CoordinatorState::Closed);
        tracing::info!(group = %self.group_id, member = %self.member_id(), "left consumer group");
    }
}

#[cfg(test)]
mod tests {
    use todo_api::{Acks, BrokerProducer, Envelope};
    use todo_broker::MemoryBroker;

    use super::*;

    const GROUP: &str = "reader_service_consumer";

    async fn setup(partitions: i32) -> (MemoryBroker, Coordinator) {
        let broker = MemoryBroker::new();
        broker.create_topic("todoCreate", partitions).unwrap();
        let coordinator = Coordinator::join(&broker, GROUP, &["todoCreate".to_string()])
            .await
            .unwrap();
        (broker, coordinator)
    }

    async fn produce(broker: &MemoryBroker, key: &str, value: &[u8]) {
        broker
            .produce(&Envelope::new("todoCreate", key, value.to_vec()), Acks::All)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn walks_join_assign_stream() {
        let (broker, coordinator) = setup(2).await;
        assert_eq!(coordinator.state(), CoordinatorState::Joining);

        produce(&broker, "a1", b"x").await;
        let token = CancellationToken::new();
        let message = coordinator.next_message(&token).await.unwrap();

        assert_eq!(message.value, b"x".to_vec());
        assert_eq!(coordinator.state(), CoordinatorState::Streaming);
        assert_eq!(coordinator.generation(), 1);
        assert_eq!(coordinator.assignment().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_token_stops_pull() {
        let (_, coordinator) = setup(1).await;
        let token = CancellationToken::new();
        let waiter = token.clone();
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter.cancel();
        });
        assert!(coordinator.next_message(&token).await.is_none());
        cancel.await.unwrap();
    }

    #[tokio::test]
    async fn commit_advances_group_cursor() {
        let (broker, coordinator) = setup(1).await;
        produce(&broker, "a1", b"x").await;
        let token = CancellationToken::new();
        let message = coordinator.next_message(&token).await.unwrap();

        coordinator.commit(&message).await.unwrap();
        assert_eq!(broker.committed(GROUP, &message.topic_partition()), Some(1));
    }

    async fn pull(coordinator: &Coordinator, n: usize) -> Vec<ConsumedMessage> {
        let token = CancellationToken::new();
        let mut messages = Vec::new();
        for _ in 0..n {
            messages.push(coordinator.next_message(&token).await.unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn late_commit_of_earlier_offset_is_a_no_op() {
        let (broker, coordinator) = setup(1).await;
        for key in ["a1", "a2", "a3"] {
            produce(&broker, key, b"x").await;
        }
        let messages = pull(&coordinator, 3).await;
        let tp = messages[0].topic_partition();

        coordinator.commit(&messages[2]).await.unwrap();
        coordinator.commit(&messages[0]).await.unwrap();
        assert_eq!(broker.committed(GROUP, &tp), Some(3));
    }

    #[tokio::test]
    async fn skipped_message_holds_the_cursor() {
        let (broker, coordinator) = setup(1).await;
        for key in ["a1", "a2", "a3"] {
            produce(&broker, key, b"x").await;
        }
        let messages = pull(&coordinator, 3).await;
        let tp = messages[0].topic_partition();

        coordinator.commit(&messages[0]).await.unwrap();
        coordinator.skip(&messages[1]);
        coordinator.commit(&messages[2]).await.unwrap();
        assert_eq!(broker.committed(GROUP, &tp), Some(1));
    }

    #[tokio::test]
    async fn skipping_the_first_offset_commits_nothing() {
        let (broker, coordinator) = setup(1).await;
        produce(&broker, "a1", b"x").await;
        produce(&broker, "a2", b"x").await;
        let messages = pull(&coordinator, 2).await;

        coordinator.skip(&messages[0]);
        coordinator.commit(&messages[1]).await.unwrap();
        assert_eq!(broker.committed(GROUP, &messages[0].topic_partition()), None);
    }

    #[tokio::test]
    async fn commit_failure_is_reported_with_coordinates() {
        let (broker, coordinator) = setup(1).await;
        produce(&broker, "a1", b"x").await;
        let token = CancellationToken::new();
        let message = coordinator.next_message(&token).await.unwrap();

        broker.fail_commits(true);
        let err = coordinator.commit(&message).await.unwrap_err();
        assert_eq!(err.topic, "todoCreate");
        assert_eq!(err.offset, 0);
        assert!(err.source.is_transient());
    }

    #[tokio::test]
    async fn close_releases_membership_and_rejects_commits() {
        let (broker, coordinator) = setup(1).await;
        produce(&broker, "a1", b"x").await;
        let token = CancellationToken::new();
        let message = coordinator.next_message(&token).await.unwrap();

        coordinator.close().await;
        assert_eq!(coordinator.state(), CoordinatorState::Closed);
        assert!(broker.members(GROUP).is_empty());
        assert!(coordinator.next_message(&token).await.is_none());

        let err = coordinator.commit(&message).await.unwrap_err();
        assert_eq!(err.source.kind(), BrokerErrorKind::Closed);

        // Idempotent.
        coordinator.close().await;
    }

    #[tokio::test]
    async fn second_member_causes_rebalance() {
        let (broker, first) = setup(4).await;
        produce(&broker, "a1", b"x").await;
        let token = CancellationToken::new();
        first.next_message(&token).await.unwrap();
        assert_eq!(first.assignment().len(), 4);

        let second = Coordinator::join(&broker, GROUP, &["todoCreate".to_string()])
            .await
            .unwrap();

        // Feed both members so each observes its new assignment.
        for i in 0..16 {
            produce(&broker, &format!("k{i}"), b"y").await;
        }
        first.next_message(&token).await.unwrap();
        second.next_message(&token).await.unwrap();

        assert_eq!(first.generation(), 2);
        assert_eq!(first.assignment().len() + second.assignment().len(), 4);
    }

    #[tokio::test]
    async fn join_failure_is_typed() {
        let broker = MemoryBroker::new();
        let err = match Coordinator::join(&broker, GROUP, &["missing".to_string()]).await {
            Ok(_) => panic!("join should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, CoordinatorError::Join { .. }));

        let err = match Coordinator::join(&broker, GROUP, &[]).await {
            Ok(_) => panic!("join should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, CoordinatorError::NoTopics(_)));
    }
}
