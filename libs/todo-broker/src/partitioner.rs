//! Partition selection for produced records.
//!
//! Keyed records use Kafka's default murmur2 routing so a given key always
//! lands on the same partition, and the same partition a real Kafka cluster
//! would pick. Unkeyed records are spread round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};

use murmur2::{KAFKA_SEED, murmur2};

/// Partition for `key` among `partition_count` partitions (must be > 0).
pub fn partition_for_key(key: &[u8], partition_count: i32) -> i32 {
    debug_assert!(partition_count > 0, "partition_count must be positive");
    // Matches Kafka's Utils.toPositive(Utils.murmur2(key)) % numPartitions
    let hash = murmur2(key, KAFKA_SEED);
    ((hash & 0x7fff_ffff) as i32) % partition_count
}

/// Round-robin selector for records without a key.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn next(&self, partition_count: i32) -> i32 {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        (n % partition_count as usize) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_partition() {
        let p1 = partition_for_key(b"a1", 12);
        let p2 = partition_for_key(b"a1", 12);
        assert_eq!(p1, p2);
        assert!((0..12).contains(&p1));
    }

    #[test]
    fn keys_spread_over_partitions() {
        let seen: std::collections::HashSet<i32> = (0..500)
            .map(|i| partition_for_key(format!("key-{i}").as_bytes(), 8))
            .collect();
        assert!(seen.len() > 1);
    }

    #[test]
    fn single_partition_always_zero() {
        for i in 0..50 {
            assert_eq!(partition_for_key(format!("k{i}").as_bytes(), 1), 0);
        }
    }

    #[test]
    fn round_robin_cycles() {
        let rr = RoundRobin::default();
        let picks: Vec<i32> = (0..6).map(|_| rr.next(3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }
}
