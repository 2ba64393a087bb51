pub mod api;
pub mod reader;
pub mod standalone;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use todo_api_server::{AppState, ServeError};
use todo_pipeline::{Producer, Reader, RouteTable, TodoCommands, TopicAssignment};

use crate::broker::BrokerClients;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// How long in-flight HTTP requests get after shutdown starts.
const HTTP_DRAIN: Duration = Duration::from_secs(5);

pub(crate) fn build_producer(config: &ServerConfig, clients: &BrokerClients) -> Arc<Producer> {
    Arc::new(Producer::new(Arc::clone(&clients.producer), config.producer.clone()))
}

pub(crate) fn spawn_api(
    config: &ServerConfig,
    producer: Arc<Producer>,
    token: &CancellationToken,
) -> JoinHandle<Result<(), ServeError>> {
    let topics = TopicAssignment::from(&config.kafka_topics);
    let commands = Arc::new(TodoCommands::new(producer, topics));
    let state = AppState::new(commands, config.http.clone());
    tokio::spawn(todo_api_server::run(state, token.child_token()))
}

pub(crate) async fn start_reader(
    config: &ServerConfig,
    clients: &BrokerClients,
    token: &CancellationToken,
) -> Result<Reader, ServerError> {
    let routes = RouteTable::logging(&TopicAssignment::from(&config.kafka_topics));
    let reader = Reader::start(clients.groups.as_ref(), &config.kafka.group_id, routes, &config.reader, token).await?;
    Ok(reader)
}

/// Wait for the HTTP server to finish in-flight requests, abort it if it
/// takes longer than [`HTTP_DRAIN`].
pub(crate) async fn stop_api(mut handle: JoinHandle<Result<(), ServeError>>) -> Result<(), ServerError> {
    match tokio::time::timeout(HTTP_DRAIN, &mut handle).await {
        Ok(joined) => Ok(joined??),
        Err(_) => {
            tracing::warn!("http server did not stop in time, aborting");
            handle.abort();
            Ok(())
        }
    }
}

pub(crate) async fn close_producer(producer: &Producer) {
    if let Err(e) = producer.close().await {
        tracing::warn!(error = %e, "producer close failed");
    }
}
