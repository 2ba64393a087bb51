pub mod broker;
pub mod codec;
pub mod command;
pub mod envelope;
pub mod error;
pub mod util;

pub use broker::{Acks, BrokerFuture, BrokerProducer, GroupClient, GroupSession, SessionEvent};
pub use command::{Command, CommandKind, CreateTodo, DeleteTodo, UpdateTodo};
pub use envelope::{ConsumedMessage, Delivery, Envelope, TopicPartition};
pub use error::{BrokerError, BrokerErrorKind, DecodeError, EncodeError, ValidationError};
pub use util::now_ms;
