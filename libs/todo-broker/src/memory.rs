//! Embedded broker: partitioned logs plus consumer groups in one process.
//!
//! Used by the `standalone` mode and as the broker fake in tests. Offers
//! fault injection (unreachable broker, failing produces, failing commits)
//! and read-only introspection so tests can observe committed cursors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, watch};

use todo_api::{
    Acks, BrokerError, BrokerFuture, BrokerProducer, ConsumedMessage, Delivery, Envelope,
    GroupClient, GroupSession, SessionEvent, TopicPartition,
};

use crate::group::{Assignment, GroupRegistry};
use crate::topic::TopicRegistry;

// ═══════════════════════════════════════════════════════════════
//  Faults
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Faults {
    unreachable: AtomicBool,
    failing_produces: AtomicUsize,
    failing_commits: AtomicBool,
    produce_attempts: AtomicU64,
}

impl Faults {
    fn take_produce_failure(&self) -> bool {
        self.failing_produces
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct Inner {
    topics: TopicRegistry,
    groups: GroupRegistry,
    // Bumped on every append; sessions wait on it instead of busy-polling.
    appended: watch::Sender<u64>,
    faults: Faults,
}

impl Inner {
    fn check_reachable(&self) -> Result<(), BrokerError> {
        if self.faults.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::transient("broker unreachable"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// Cheap to clone; clones share the same logs and groups.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                topics: TopicRegistry::new(),
                groups: GroupRegistry::default(),
                appended,
                faults: Faults::default(),
            }),
        }
    }

    pub fn create_topic(&self, name: &str, partitions: i32) -> Result<(), BrokerError> {
        self.inner.topics.create(name, partitions)?;
        Ok(())
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.topics.names()
    }

    // ── fault injection ─────────────────────────────────────────

    /// While set, every produce, join, poll and commit fails with a
    /// transient error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.faults.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `n` produce attempts with a transient error.
    pub fn fail_next_produces(&self, n: usize) {
        self.inner.faults.failing_produces.store(n, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.inner.faults.failing_commits.store(fail, Ordering::SeqCst);
    }

    /// Produce attempts seen so far, failed ones included.
    pub fn produce_attempts(&self) -> u64 {
        self.inner.faults.produce_attempts.load(Ordering::SeqCst)
    }

    // ── introspection ───────────────────────────────────────────

    /// High watermark of a partition.
    pub fn partition_len(&self, topic: &str, partition: i32) -> Option<i64> {
        self.inner.topics.get(topic).ok()?.len(partition).ok()
    }

    pub fn read(&self, topic: &str, partition: i32, offset: i64) -> Option<ConsumedMessage> {
        self.inner.topics.get(topic).ok()?.read(partition, offset).ok()?
    }

    /// Next offset the group will read from `partition`.
    pub fn committed(&self, group_id: &str, partition: &TopicPartition) -> Option<i64> {
        self.inner.groups.committed(group_id, partition)
    }

    pub fn generation(&self, group_id: &str) -> Option<u64> {
        self.inner.groups.generation(group_id)
    }

    pub fn members(&self, group_id: &str) -> Vec<String> {
        self.inner.groups.members(group_id)
    }

    pub fn assignment(&self, group_id: &str, member_id: &str) -> Option<Assignment> {
        self.inner.groups.assignment(group_id, member_id)
    }
}

impl BrokerProducer for MemoryBroker {
    fn produce<'a>(&'a self, envelope: &'a Envelope, acks: Acks) -> BrokerFuture<'a, Delivery> {
        Box::pin(async move {
            self.inner.faults.produce_attempts.fetch_add(1, Ordering::SeqCst);
            self.inner.check_reachable()?;
            if self.inner.faults.take_produce_failure() {
                return Err(BrokerError::transient("injected produce failure"));
            }

            let topic = self.inner.topics.get(envelope.topic())?;
            // Single in-process replica: every acks level is satisfied by the append.
            let delivery = topic.append(envelope.key(), envelope.value(), envelope.timestamp_ms());
            self.inner.appended.send_modify(|n| *n = n.wrapping_add(1));

            tracing::trace!(
                topic = %envelope.topic(),
                partition = delivery.partition,
                offset = delivery.offset,
                ?acks,
                "record appended",
            );
            Ok(delivery)
        })
    }
}

impl GroupClient for MemoryBroker {
    fn join<'a>(&'a self, group_id: &'a str, topics: &'a [String]) -> BrokerFuture<'a, Arc<dyn GroupSession>> {
        Box::pin(async move {
            self.inner.check_reachable()?;
            let (member_id, assignments) = self.inner.groups.join(group_id, topics, &self.inner.topics)?;
            let session = MemorySession {
                inner: Arc::clone(&self.inner),
                group_id: group_id.to_string(),
                member_id,
                left: AtomicBool::new(false),
                cursor: Mutex::new(Cursor {
                    assignments,
                    appended: self.inner.appended.subscribe(),
                    generation: 0,
                    positions: BTreeMap::new(),
                    next: 0,
                }),
            };
            Ok(Arc::new(session) as Arc<dyn GroupSession>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySession
// ═══════════════════════════════════════════════════════════════

struct Cursor {
    assignments: watch::Receiver<Assignment>,
    appended: watch::Receiver<u64>,
    /// Generation last reported to the caller; 0 before the first one.
    generation: u64,
    /// Next offset to hand out, per owned partition.
    positions: BTreeMap<TopicPartition, i64>,
    /// Where the next scan over owned partitions starts.
    next: usize,
}

pub struct MemorySession {
    inner: Arc<Inner>,
    group_id: String,
    member_id: String,
    left: AtomicBool,
    cursor: Mutex<Cursor>,
}

impl MemorySession {
    fn apply(&self, cursor: &mut Cursor, assignment: &Assignment) {
        let mut positions = BTreeMap::new();
        for tp in &assignment.partitions {
            let position = cursor
                .positions
                .get(tp)
                .copied()
                .or_else(|| self.inner.groups.committed(&self.group_id, tp))
                .unwrap_or(0);
            positions.insert(tp.clone(), position);
        }
        cursor.positions = positions;
        cursor.generation = assignment.generation;
        cursor.next = 0;
    }

    /// Next available record across owned partitions, rotating the starting
    /// partition so one busy partition cannot starve the others.
    fn next_record(&self, cursor: &mut Cursor) -> Option<ConsumedMessage> {
        let owned: Vec<TopicPartition> = cursor.positions.keys().cloned().collect();
        let n = owned.len();
        for i in 0..n {
            let idx = (cursor.next + i) % n;
            let tp = &owned[idx];
            let position = cursor.positions.get(tp).copied().unwrap_or(0);
            let Ok(topic) = self.inner.topics.get(&tp.topic) else {
                continue;
            };
            if let Ok(Some(message)) = topic.read(tp.partition, position) {
                cursor.positions.insert(tp.clone(), position + 1);
                cursor.next = idx + 1;
                return Some(message);
            }
        }
        None
    }
}

impl GroupSession for MemorySession {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn poll(&self) -> BrokerFuture<'_, SessionEvent> {
        Box::pin(async move {
            let mut guard = self.cursor.lock().await;
            let cursor = &mut *guard;
            loop {
                if self.left.load(Ordering::SeqCst) {
                    return Ok(SessionEvent::Closed);
                }
                self.inner.check_reachable()?;

                let latest = cursor.assignments.borrow_and_update().clone();
                if latest.generation != cursor.generation {
                    self.apply(cursor, &latest);
                    return Ok(SessionEvent::Assigned {
                        generation: latest.generation,
                        partitions: latest.partitions,
                    });
                }

                // Mark appends seen before scanning so one landing mid-scan
                // still wakes the wait below.
                cursor.appended.borrow_and_update();
                if let Some(message) = self.next_record(cursor) {
                    return Ok(SessionEvent::Message(message));
                }

                tokio::select! {
                    changed = cursor.assignments.changed() => {
                        if changed.is_err() {
                            return Ok(SessionEvent::Closed);
                        }
                    }
                    _ = cursor.appended.changed() => {}
                }
            }
        })
    }

    fn commit<'a>(&'a self, partition: &'a TopicPartition, offset: i64) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            if self.left.load(Ordering::SeqCst) {
                return Err(BrokerError::closed(format!("member '{}' has left", self.member_id)));
            }
            self.inner.check_reachable()?;
            if self.inner.faults.failing_commits.load(Ordering::SeqCst) {
                return Err(BrokerError::transient("injected commit failure"));
            }
            self.inner.groups.commit(&self.group_id, &self.member_id, partition, offset)
        })
    }

    fn leave(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            if !self.left.swap(true, Ordering::SeqCst) {
                self.inner.groups.leave(&self.group_id, &self.member_id, &self.inner.topics);
            }
            Ok(())
        })
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.left.swap(true, Ordering::SeqCst) {
            self.inner.groups.leave(&self.group_id, &self.member_id, &self.inner.topics);
        }
    }
}
