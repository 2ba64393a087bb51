//! Broker clients for the todo command pipeline.
//!
//! [`MemoryBroker`] is a complete in-process broker (partitioned logs,
//! consumer groups, committed cursors). The `kafka` feature adds clients
//! for a real Kafka cluster.

pub mod error;
mod group;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(any(feature = "kafka", test))]
mod ledger;
mod memory;
mod partitioner;
mod topic;

pub use error::TopicError;
pub use group::Assignment;
pub use memory::{MemoryBroker, MemorySession};
pub use partitioner::partition_for_key;
