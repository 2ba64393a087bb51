use todo_api::BrokerError;
use todo_api_server::ServeError;
use todo_pipeline::{ConfigError, ReaderError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("config: {0}")]
    Invalid(#[from] ConfigError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("reader: {0}")]
    Reader(#[from] ReaderError),

    #[error("{0}")]
    Http(#[from] ServeError),

    #[error("task: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
