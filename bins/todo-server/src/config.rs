use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use todo_api_server::HttpConfig;
use todo_pipeline::{ProducerConfig, ReaderConfig, TopicsConfig};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "todo-server", about = "Todo command ingestion service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP command API
    Api(ServeArgs),
    /// Consume the command topics
    Reader(ServeArgs),
    /// API and reader in one process
    Standalone(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ═══════════════════════════════════════════════════════════════
//  TOML Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrokerBackend {
    /// Embedded in-process broker.
    #[default]
    Memory,
    Kafka,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    #[serde(default)]
    pub backend: BrokerBackend,
    #[serde(default)]
    pub brokers: Vec<String>,
    /// Legacy coordination addresses. Only logged.
    #[serde(default)]
    pub zookeepers: Vec<String>,
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_group_id() -> String {
    "reader_service_consumer".into()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::default(),
            brokers: Vec::new(),
            zookeepers: Vec::new(),
            group_id: default_group_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub kafka_topics: TopicsConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
}

fn default_service_name() -> String {
    "todo-server".into()
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        let mut config = Self::parse(&content, path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str, path: &str) -> Result<Self, ServerError> {
        toml::from_str(content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    /// `HTTP_PORT`, `KAFKA_BROKERS` and `ZOOKEEPERS` win over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ServerError> {
        if let Some(port) = lookup("HTTP_PORT") {
            self.http.port = port.trim().parse().map_err(|e| ServerError::Config {
                context: "env",
                detail: format!("HTTP_PORT '{port}': {e}"),
            })?;
        }
        if let Some(brokers) = lookup("KAFKA_BROKERS") {
            self.kafka.brokers = split_list(&brokers);
        }
        if let Some(zookeepers) = lookup("ZOOKEEPERS") {
            self.kafka.zookeepers = split_list(&zookeepers);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.kafka.backend == BrokerBackend::Kafka {
            if !cfg!(feature = "kafka") {
                return Err(ServerError::Config {
                    context: "kafka.backend",
                    detail: "kafka backend selected but this build lacks the `kafka` feature".into(),
                });
            }
            if self.kafka.brokers.is_empty() {
                return Err(ServerError::Config {
                    context: "kafka.brokers",
                    detail: "kafka backend needs at least one broker".into(),
                });
            }
        }
        if self.kafka.group_id.trim().is_empty() {
            return Err(ServerError::Config { context: "kafka.group_id", detail: "must not be empty".into() });
        }
        self.kafka_topics.validate()?;
        self.producer.validate()?;
        self.reader.validate()?;
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}
