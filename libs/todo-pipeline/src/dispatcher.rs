//! Worker pool: `pool_size` workers pulling from one shared coordinator
//! stream.
//!
//! There is no per-partition worker affinity. Two messages from the same
//! partition can be in flight on different workers at once, so topic
//! actions must not rely on in-process ordering.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use todo_api::{Command, CommandKind, ConsumedMessage, codec};

use crate::config::{FailurePolicy, ReaderConfig};
use crate::coordinator::Coordinator;
use crate::error::{HandlerError, ProcessError};
use crate::handlers::TopicAssignment;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

// ═══════════════════════════════════════════════════════════════
//  MessageHandler
// ═══════════════════════════════════════════════════════════════

/// Topic-specific action run on each decoded command.
///
/// Messages can be delivered more than once, so implementations should be
/// idempotent.
pub trait MessageHandler: Send + Sync {
    fn handle<'a>(&'a self, command: &'a Command, message: &'a ConsumedMessage) -> HandlerFuture<'a>;
}

/// Logs every command it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl MessageHandler for LogHandler {
    fn handle<'a>(&'a self, command: &'a Command, message: &'a ConsumedMessage) -> HandlerFuture<'a> {
        Box::pin(async move {
            tracing::info!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                kind = %command.kind(),
                id = %command.id(),
                title = command.title().unwrap_or_default(),
                "command received",
            );
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  RouteTable
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
struct Route {
    kind: CommandKind,
    handler: Arc<dyn MessageHandler>,
}

/// topic → (command kind to decode as, action to run).
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every command topic to `handler`.
    pub fn for_topics(topics: &TopicAssignment, handler: Arc<dyn MessageHandler>) -> Self {
        CommandKind::ALL.into_iter().fold(Self::new(), |table, kind| {
            table.route(topics.topic_for(kind), kind, Arc::clone(&handler))
        })
    }

    /// Every command topic logged by [`LogHandler`].
    pub fn logging(topics: &TopicAssignment) -> Self {
        Self::for_topics(topics, Arc::new(LogHandler))
    }

    /// Add or replace the route for `topic`.
    pub fn route(mut self, topic: impl Into<String>, kind: CommandKind, handler: Arc<dyn MessageHandler>) -> Self {
        self.routes.insert(topic.into(), Route { kind, handler });
        self
    }

    /// Subscribed topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn get(&self, topic: &str) -> Option<&Route> {
        self.routes.get(topic)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Workers
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    pub failure_policy: FailurePolicy,
    pub handler_timeout: Option<Duration>,
}

impl From<&ReaderConfig> for DispatchOptions {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            failure_policy: config.failure_policy,
            handler_timeout: config.handler_timeout(),
        }
    }
}

/// Spawn exactly `pool_size` workers. Each stops when `token` is cancelled
/// or the coordinator closes.
pub fn spawn_workers(
    token: CancellationToken,
    coordinator: Arc<Coordinator>,
    pool_size: usize,
    routes: Arc<RouteTable>,
    options: DispatchOptions,
) -> Vec<JoinHandle<()>> {
    (0..pool_size)
        .map(|worker| {
            let token = token.clone();
            let coordinator = Arc::clone(&coordinator);
            let routes = Arc::clone(&routes);
            tokio::spawn(async move { run_worker(worker, token, coordinator, routes, options).await })
        })
        .collect()
}

async fn run_worker(
    worker: usize,
    token: CancellationToken,
    coordinator: Arc<Coordinator>,
    routes: Arc<RouteTable>,
    options: DispatchOptions,
) {
    tracing::debug!(worker, "worker started");

    while let Some(message) = coordinator.next_message(&token).await {
        tracing::debug!(
            worker,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "message received",
        );

        match process(&routes, &message, options.handler_timeout).await {
            Ok(()) => commit(worker, &coordinator, &message).await,
            Err(e) => {
                tracing::error!(
                    worker,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    policy = ?options.failure_policy,
                    error = %e,
                    "message processing failed",
                );
                match options.failure_policy {
                    FailurePolicy::Commit => commit(worker, &coordinator, &message).await,
                    FailurePolicy::Skip => coordinator.skip(&message),
                }
            }
        }
    }

    tracing::debug!(worker, "worker stopped");
}

async fn commit(worker: usize, coordinator: &Coordinator, message: &ConsumedMessage) {
    if let Err(e) = coordinator.commit(message).await {
        tracing::warn!(worker, error = %e, "commit failed, message will be redelivered");
    }
}

async fn process(
    routes: &RouteTable,
    message: &ConsumedMessage,
    timeout: Option<Duration>,
) -> Result<(), ProcessError> {
    let Some(route) = routes.get(&message.topic) else {
        tracing::warn!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "no route for topic, skipping message",
        );
        return Ok(());
    };

    let command = codec::decode(route.kind, &message.value)?;
    let action = route.handler.handle(&command, message);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, action)
            .await
            .map_err(|_| ProcessError::Timeout(limit))??,
        None => action.await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder(Mutex<Vec<Command>>);

    impl MessageHandler for Recorder {
        fn handle<'a>(&'a self, command: &'a Command, _message: &'a ConsumedMessage) -> HandlerFuture<'a> {
            Box::pin(async move {
                self.0.lock().unwrap().push(command.clone());
                Ok(())
            })
        }
    }

    struct Stuck;

    impl MessageHandler for Stuck {
        fn handle<'a>(&'a self, _command: &'a Command, _message: &'a ConsumedMessage) -> HandlerFuture<'a> {
            Box::pin(std::future::pending())
        }
    }

    fn message(topic: &str, command: &Command) -> ConsumedMessage {
        ConsumedMessage {
            topic: topic.to_string(),
            partition: 0,
            offset: 7,
            key: command.id().as_bytes().to_vec(),
            value: codec::encode(command).unwrap(),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn route_table_covers_all_command_topics() {
        let table = RouteTable::logging(&TopicAssignment::default());
        assert_eq!(table.topics(), vec!["todoCreate", "todoDelete", "todoUpdate"]);
        assert!(!RouteTable::new().route("t", CommandKind::Create, Arc::new(LogHandler)).is_empty());
    }

    #[tokio::test]
    async fn decodes_with_route_kind() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let table = RouteTable::for_topics(&TopicAssignment::default(), recorder.clone());
        let command = Command::Delete { id: "a1".into() };

        process(&table, &message("todoDelete", &command), None).await.unwrap();
        assert_eq!(recorder.0.lock().unwrap().as_slice(), &[command]);
    }

    #[tokio::test]
    async fn garbage_is_a_decode_error() {
        let table = RouteTable::logging(&TopicAssignment::default());
        let mut bad = message("todoCreate", &Command::Create { id: "a1".into(), title: "x".into() });
        bad.value = vec![0x0a, 0xc8, 0x01, 0x41];

        let err = process(&table, &bad, None).await.unwrap_err();
        assert!(matches!(err, ProcessError::Decode(_)));
    }

    #[tokio::test]
    async fn unrouted_topic_is_not_an_error() {
        let table = RouteTable::new();
        let command = Command::Delete { id: "a1".into() };
        assert!(process(&table, &message("elsewhere", &command), None).await.is_ok());
    }

    #[tokio::test]
    async fn stuck_handler_times_out() {
        let table = RouteTable::for_topics(&TopicAssignment::default(), Arc::new(Stuck));
        let command = Command::Delete { id: "a1".into() };
        let limit = Duration::from_millis(20);

        let err = process(&table, &message("todoDelete", &command), Some(limit))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(d) if d == limit));
    }
}
