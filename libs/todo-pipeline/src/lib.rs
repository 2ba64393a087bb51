//! Command pipeline: the publish side (producer, command handlers) and the
//! consume side (group coordinator, worker pool, reader lifecycle).

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod handlers;
mod producer;
mod reader;

pub use config::{FailurePolicy, ProducerConfig, ReaderConfig, TopicConfig, TopicsConfig};
pub use coordinator::{Coordinator, CoordinatorState};
pub use dispatcher::{DispatchOptions, HandlerFuture, LogHandler, MessageHandler, RouteTable};
pub use error::{
    CommandError, CommitError, ConfigError, CoordinatorError, HandlerError, ProcessError, PublishError,
    ReaderError,
};
pub use handlers::{
    CommandHandler, CreateTodoHandler, DeleteTodoHandler, Published, TodoCommands, TopicAssignment,
    UpdateTodoHandler,
};
pub use producer::Producer;
pub use reader::Reader;
