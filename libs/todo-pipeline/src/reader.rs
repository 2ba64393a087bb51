use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use todo_api::GroupClient;

use crate::config::ReaderConfig;
use crate::coordinator::{Coordinator, CoordinatorState};
use crate::dispatcher::{DispatchOptions, RouteTable, spawn_workers};
use crate::error::ReaderError;

/// The consume side of the pipeline: one coordinator plus its worker pool.
pub struct Reader {
    token: CancellationToken,
    coordinator: Arc<Coordinator>,
    workers: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl Reader {
    /// Join the group and start the pool. Fails fast if the group cannot be
    /// joined. Cancelling `parent` stops the reader.
    pub async fn start(
        client: &dyn GroupClient,
        group_id: &str,
        routes: RouteTable,
        config: &ReaderConfig,
        parent: &CancellationToken,
    ) -> Result<Self, ReaderError> {
        config.validate()?;

        let coordinator = Arc::new(Coordinator::join(client, group_id, &routes.topics()).await?);
        let token = parent.child_token();
        let workers = spawn_workers(
            token.clone(),
            Arc::clone(&coordinator),
            config.pool_size,
            Arc::new(routes),
            DispatchOptions::from(config),
        );

        tracing::info!(
            group = %group_id,
            member = %coordinator.member_id(),
            pool_size = config.pool_size,
            policy = ?config.failure_policy,
            "reader started",
        );

        Ok(Self {
            token,
            coordinator,
            workers,
            drain_timeout: config.drain_timeout(),
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }

    /// Block until the token is cancelled or the group session closes on
    /// its own, then drain.
    pub async fn run(self) {
        let mut state = self.coordinator.watch_state();
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = state.wait_for(|s| *s == CoordinatorState::Closed) => {
                tracing::warn!(group = %self.coordinator.group_id(), "group session closed");
            }
        }
        self.shutdown().await;
    }

    /// Stop pulling, give in-flight messages `drain_timeout` to finish,
    /// abort what is left, then leave the group.
    pub async fn shutdown(self) {
        tracing::info!(group = %self.coordinator.group_id(), "reader draining");
        self.token.cancel();

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        let mut aborted = 0usize;
        for mut handle in self.workers {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            tracing::warn!(aborted, "workers did not drain in time");
        }

        self.coordinator.close().await;
        tracing::info!(group = %self.coordinator.group_id(), "reader stopped");
    }
}
