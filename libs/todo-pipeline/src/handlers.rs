//! Command handlers: validate, encode, route to the kind's topic, publish.
//!
//! Nothing else happens here. Ordering and durability come from the broker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use todo_api::{Command, CommandKind, CreateTodo, DeleteTodo, Delivery, UpdateTodo, codec};

use crate::config::TopicsConfig;
use crate::error::CommandError;
use crate::producer::Producer;

pub type CommandFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CommandError>> + Send + 'a>>;

// ═══════════════════════════════════════════════════════════════
//  TopicAssignment
// ═══════════════════════════════════════════════════════════════

/// Static command kind → topic mapping, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAssignment {
    create: String,
    update: String,
    delete: String,
}

impl TopicAssignment {
    pub fn new(create: impl Into<String>, update: impl Into<String>, delete: impl Into<String>) -> Self {
        Self {
            create: create.into(),
            update: update.into(),
            delete: delete.into(),
        }
    }

    pub fn topic_for(&self, kind: CommandKind) -> &str {
        match kind {
            CommandKind::Create => &self.create,
            CommandKind::Update => &self.update,
            CommandKind::Delete => &self.delete,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        CommandKind::ALL.iter().map(|k| self.topic_for(*k).to_string()).collect()
    }
}

impl Default for TopicAssignment {
    fn default() -> Self {
        Self::from(&TopicsConfig::default())
    }
}

impl From<&TopicsConfig> for TopicAssignment {
    fn from(config: &TopicsConfig) -> Self {
        Self::new(
            &config.todo_create.topic_name,
            &config.todo_update.topic_name,
            &config.todo_delete.topic_name,
        )
    }
}

// ═══════════════════════════════════════════════════════════════
//  Handlers
// ═══════════════════════════════════════════════════════════════

/// A command that reached the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub command: Command,
    pub topic: String,
    pub delivery: Delivery,
}

/// One implementation per command kind.
pub trait CommandHandler<C>: Send + Sync {
    fn handle(&self, command: C) -> CommandFuture<'_, Published>;
}

/// State shared by every handler: the producer and the topic routing.
#[derive(Clone)]
struct Route {
    producer: Arc<Producer>,
    topics: Arc<TopicAssignment>,
}

impl Route {
    async fn publish(&self, command: Command) -> Result<Published, CommandError> {
        let value = codec::encode(&command)?;
        let topic = self.topics.topic_for(command.kind()).to_string();
        let delivery = self
            .producer
            .publish(&topic, command.id().as_bytes().to_vec(), value)
            .await?;

        tracing::info!(
            kind = %command.kind(),
            id = %command.id(),
            topic = %topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "command published",
        );
        Ok(Published { command, topic, delivery })
    }
}

pub struct CreateTodoHandler {
    route: Route,
}

impl CommandHandler<CreateTodo> for CreateTodoHandler {
    fn handle(&self, command: CreateTodo) -> CommandFuture<'_, Published> {
        Box::pin(async move {
            // Assigns a fresh id when the caller sent none.
            let command = command.into_command()?;
            self.route.publish(command).await
        })
    }
}

pub struct UpdateTodoHandler {
    route: Route,
}

impl CommandHandler<UpdateTodo> for UpdateTodoHandler {
    fn handle(&self, command: UpdateTodo) -> CommandFuture<'_, Published> {
        Box::pin(async move {
            let command = command.into_command()?;
            self.route.publish(command).await
        })
    }
}

pub struct DeleteTodoHandler {
    route: Route,
}

impl CommandHandler<DeleteTodo> for DeleteTodoHandler {
    fn handle(&self, command: DeleteTodo) -> CommandFuture<'_, Published> {
        Box::pin(async move {
            let command = command.into_command()?;
            self.route.publish(command).await
        })
    }
}

/// The three handlers, built over one shared producer.
pub struct TodoCommands {
    pub create: CreateTodoHandler,
    pub update: UpdateTodoHandler,
    pub delete: DeleteTodoHandler,
}

impl TodoCommands {
    pub fn new(producer: Arc<Producer>, topics: TopicAssignment) -> Self {
        let route = Route {
            producer,
            topics: Arc::new(topics),
        };
        Self {
            create: CreateTodoHandler { route: route.clone() },
            update: UpdateTodoHandler { route: route.clone() },
            delete: DeleteTodoHandler { route },
        }
    }
}

#[cfg(test)]
mod tests {
    use todo_api::{BrokerProducer, ValidationError};
    use todo_broker::MemoryBroker;

    use super::*;
    use crate::config::ProducerConfig;

    fn setup() -> (MemoryBroker, TodoCommands) {
        let broker = MemoryBroker::new();
        for topic in TopicAssignment::default().topics() {
            broker.create_topic(&topic, 3).unwrap();
        }
        let client: Arc<dyn BrokerProducer> = Arc::new(broker.clone());
        let producer = Arc::new(Producer::new(client, ProducerConfig::default()));
        (broker, TodoCommands::new(producer, TopicAssignment::default()))
    }

    #[test]
    fn assignment_names_one_topic_per_kind() {
        let topics = TopicAssignment::default();
        assert_eq!(topics.topic_for(CommandKind::Update), "todoUpdate");
        assert_eq!(topics.topics(), vec!["todoCreate", "todoUpdate", "todoDelete"]);
    }

    #[tokio::test]
    async fn create_lands_on_create_topic_keyed_by_id() {
        let (broker, commands) = setup();
        let published = commands
            .create
            .handle(CreateTodo::new("Buy milk").with_id("a1"))
            .await
            .unwrap();

        assert_eq!(published.topic, "todoCreate");
        let stored = broker
            .read("todoCreate", published.delivery.partition, published.delivery.offset)
            .unwrap();
        assert_eq!(stored.key, b"a1".to_vec());
        let decoded = codec::decode(CommandKind::Create, &stored.value).unwrap();
        assert_eq!(decoded, Command::Create { id: "a1".into(), title: "Buy milk".into() });
    }

    #[tokio::test]
    async fn create_without_id_gets_one() {
        let (_, commands) = setup();
        let published = commands.create.handle(CreateTodo::new("Buy milk")).await.unwrap();
        assert!(!published.command.id().is_empty());
    }

    #[tokio::test]
    async fn delete_needs_no_title() {
        let (broker, commands) = setup();
        let published = commands.delete.handle(DeleteTodo::new("a1")).await.unwrap();
        assert_eq!(published.topic, "todoDelete");
        assert_eq!(broker.produce_attempts(), 1);
    }

    #[tokio::test]
    async fn invalid_update_never_reaches_broker() {
        let (broker, commands) = setup();
        let err = commands.update.handle(UpdateTodo::new("", "x")).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Validation(ValidationError::MissingId { kind: CommandKind::Update })
        ));
        assert_eq!(broker.produce_attempts(), 0);
    }

    #[tokio::test]
    async fn publish_failure_propagates() {
        let (broker, commands) = setup();
        broker.set_unreachable(true);
        let err = commands
            .update
            .handle(UpdateTodo::new("a1", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Publish(ref e) if e.is_transient()));
    }
}
