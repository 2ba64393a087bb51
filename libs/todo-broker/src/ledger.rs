//! Per-session record of committed cursors.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::Mutex;

use todo_api::{BrokerError, TopicPartition};

/// Serialises commits of one session so the cursor sent to the broker
/// never moves backwards, whatever order concurrent commits arrive in.
#[derive(Default)]
pub(crate) struct CommitLedger {
    cursors: Mutex<HashMap<TopicPartition, i64>>,
}

impl CommitLedger {
    /// Run `commit` with cursor `offset + 1` unless a cursor at or past it
    /// is already stored. The lock is held across `commit`.
    pub(crate) async fn advance<F, Fut>(
        &self,
        partition: &TopicPartition,
        offset: i64,
        commit: F,
    ) -> Result<(), BrokerError>
    where
        F: FnOnce(i64) -> Fut,
        Fut: Future<Output = Result<(), BrokerError>>,
    {
        let mut cursors = self.cursors.lock().await;
        let target = offset + 1;
        if cursors.get(partition).is_some_and(|&c| c >= target) {
            return Ok(());
        }
        commit(target).await?;
        cursors.insert(partition.clone(), target);
        Ok(())
    }
}
