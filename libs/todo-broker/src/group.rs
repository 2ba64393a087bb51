//! Consumer group bookkeeping: membership, partition assignment and
//! committed cursors.
//!
//! Every join or leave triggers an immediate rebalance. Partitions are
//! dealt round-robin over the sorted member ids, so the assignment is a
//! pure function of (members, subscriptions, topic layout).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use todo_api::{BrokerError, TopicPartition};

use crate::topic::TopicRegistry;

/// Partitions owned by one member in one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    pub generation: u64,
    pub partitions: Vec<TopicPartition>,
}

struct Member {
    topics: Vec<String>,
    assignment: watch::Sender<Assignment>,
}

#[derive(Default)]
struct Group {
    generation: u64,
    members: BTreeMap<String, Member>,
    // Survives membership changes so a restarted reader resumes.
    committed: HashMap<TopicPartition, i64>,
}

#[derive(Default)]
pub struct GroupRegistry {
    groups: Mutex<HashMap<String, Group>>,
}

impl GroupRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Group>> {
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a member subscribed to `topics`. Returns the new member id and
    /// the receiver on which its assignments are published.
    pub fn join(
        &self,
        group_id: &str,
        topics: &[String],
        registry: &TopicRegistry,
    ) -> Result<(String, watch::Receiver<Assignment>), BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::permanent("cannot join a group without topics"));
        }
        for topic in topics {
            registry
                .get(topic)
                .map_err(|e| e.into_broker_error().with_context(format!("join '{group_id}'")))?;
        }

        let member_id = format!("{group_id}-{}", uuid::Uuid::new_v4());
        let (tx, rx) = watch::channel(Assignment::default());

        let mut groups = self.lock();
        let group = groups.entry(group_id.to_string()).or_default();
        group.members.insert(
            member_id.clone(),
            Member {
                topics: topics.to_vec(),
                assignment: tx,
            },
        );
        tracing::info!(group = %group_id, member = %member_id, "member joined");
        rebalance(group_id, group, registry);

        Ok((member_id, rx))
    }

    /// Remove a member. Its assignment sender is dropped, which wakes any
    /// poll waiting on it.
    pub fn leave(&self, group_id: &str, member_id: &str, registry: &TopicRegistry) {
        let mut groups = self.lock();
        let Some(group) = groups.get_mut(group_id) else {
            return;
        };
        if group.members.remove(member_id).is_none() {
            return;
        }
        tracing::info!(group = %group_id, member = %member_id, "member left");
        rebalance(group_id, group, registry);
    }

    /// Store `offset + 1` as the next position to read, never moving the
    /// cursor backwards.
    pub fn commit(
        &self,
        group_id: &str,
        member_id: &str,
        partition: &TopicPartition,
        offset: i64,
    ) -> Result<(), BrokerError> {
        let mut groups = self.lock();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| BrokerError::closed(format!("group '{group_id}' has no members")))?;
        let member = group
            .members
            .get(member_id)
            .ok_or_else(|| BrokerError::closed(format!("member '{member_id}' is not in group '{group_id}'")))?;
        if !member.assignment.borrow().partitions.contains(partition) {
            return Err(BrokerError::rebalancing(format!(
                "partition {partition} is not assigned to member '{member_id}'"
            )));
        }

        let next = offset + 1;
        let cursor = group.committed.entry(partition.clone()).or_insert(next);
        if *cursor < next {
            *cursor = next;
        }
        Ok(())
    }

    pub fn committed(&self, group_id: &str, partition: &TopicPartition) -> Option<i64> {
        self.lock().get(group_id)?.committed.get(partition).copied()
    }

    pub fn generation(&self, group_id: &str) -> Option<u64> {
        self.lock().get(group_id).map(|g| g.generation)
    }

    pub fn members(&self, group_id: &str) -> Vec<String> {
        self.lock()
            .get(group_id)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn assignment(&self, group_id: &str, member_id: &str) -> Option<Assignment> {
        let groups = self.lock();
        let member = groups.get(group_id)?.members.get(member_id)?;
        Some(member.assignment.borrow().clone())
    }
}

fn rebalance(group_id: &str, group: &mut Group, registry: &TopicRegistry) {
    group.generation += 1;

    let subscribed: BTreeSet<&str> = group
        .members
        .values()
        .flat_map(|m| m.topics.iter().map(String::as_str))
        .collect();

    let mut plan: BTreeMap<&str, Vec<TopicPartition>> =
        group.members.keys().map(|id| (id.as_str(), Vec::new())).collect();

    let mut next = 0usize;
    for topic in subscribed {
        let Ok(t) = registry.get(topic) else {
            continue;
        };
        let eligible: Vec<&str> = group
            .members
            .iter()
            .filter(|(_, m)| m.topics.iter().any(|s| s == topic))
            .map(|(id, _)| id.as_str())
            .collect();
        for partition in 0..t.partition_count() {
            let owner = eligible[next % eligible.len()];
            next += 1;
            if let Some(owned) = plan.get_mut(owner) {
                owned.push(TopicPartition::new(topic, partition));
            }
        }
    }

    let generation = group.generation;
    for (id, member) in &group.members {
        let partitions = plan.remove(id.as_str()).unwrap_or_default();
        tracing::debug!(
            group = %group_id,
            member = %id,
            generation,
            partitions = partitions.len(),
            "assignment updated",
        );
        member.assignment.send_replace(Assignment { generation, partitions });
    }
    tracing::info!(group = %group_id, generation, members = group.members.len(), "group rebalanced");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TopicRegistry {
        let reg = TopicRegistry::new();
        reg.create("a", 3).unwrap();
        reg.create("b", 2).unwrap();
        reg
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_member_owns_everything() {
        let reg = registry();
        let groups = GroupRegistry::default();
        let (_, rx) = groups.join("g", &topics(&["a", "b"]), &reg).unwrap();
        let a = rx.borrow().clone();
        assert_eq!(a.generation, 1);
        assert_eq!(a.partitions.len(), 5);
    }

    #[test]
    fn partitions_split_without_overlap() {
        let reg = registry();
        let groups = GroupRegistry::default();
        let (_, rx1) = groups.join("g", &topics(&["a", "b"]), &reg).unwrap();
        let (_, rx2) = groups.join("g", &topics(&["a", "b"]), &reg).unwrap();

        let a1 = rx1.borrow().clone();
        let a2 = rx2.borrow().clone();
        assert_eq!(a1.generation, 2);
        assert_eq!(a2.generation, 2);

        let mut all: Vec<TopicPartition> = a1.partitions.iter().chain(&a2.partitions).cloned().collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 5);
        assert_eq!(a1.partitions.len() + a2.partitions.len(), 5);
        assert!(!a1.partitions.is_empty() && !a2.partitions.is_empty());
    }

    #[test]
    fn leave_hands_partitions_to_remaining_member() {
        let reg = registry();
        let groups = GroupRegistry::default();
        let (m1, rx1) = groups.join("g", &topics(&["a"]), &reg).unwrap();
        let (m2, rx2) = groups.join("g", &topics(&["a"]), &reg).unwrap();
        groups.leave("g", &m1, &reg);

        assert!(rx1.has_changed().is_err(), "sender dropped on leave");
        let a2 = rx2.borrow().clone();
        assert_eq!(a2.generation, 3);
        assert_eq!(a2.partitions.len(), 3);
        assert_eq!(groups.members("g"), vec![m2]);
    }

    #[test]
    fn unknown_topic_rejected_on_join() {
        let reg = registry();
        let groups = GroupRegistry::default();
        let err = groups.join("g", &topics(&["missing"]), &reg).unwrap_err();
        assert_eq!(err.kind(), todo_api::BrokerErrorKind::Permanent);
        assert!(groups.members("g").is_empty());
    }

    #[test]
    fn commit_requires_ownership_and_never_rewinds() {
        let reg = registry();
        let groups = GroupRegistry::default();
        let (m1, _rx) = groups.join("g", &topics(&["a"]), &reg).unwrap();
        let tp = TopicPartition::new("a", 1);

        groups.commit("g", &m1, &tp, 4).unwrap();
        groups.commit("g", &m1, &tp, 2).unwrap();
        assert_eq!(groups.committed("g", &tp), Some(5));

        let foreign = TopicPartition::new("b", 0);
        let err = groups.commit("g", &m1, &foreign, 0).unwrap_err();
        assert_eq!(err.kind(), todo_api::BrokerErrorKind::Rebalancing);

        groups.leave("g", &m1, &reg);
        let err = groups.commit("g", &m1, &tp, 9).unwrap_err();
        assert_eq!(err.kind(), todo_api::BrokerErrorKind::Closed);
        assert_eq!(groups.committed("g", &tp), Some(5), "cursor survives an empty group");
    }
}
