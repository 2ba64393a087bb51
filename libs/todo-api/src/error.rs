use std::fmt;

use crate::command::CommandKind;

// ---------------------------------------------------------------------------
// Command-level errors
// ---------------------------------------------------------------------------

/// Caller input is malformed. Raised before any broker interaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{kind}: id is required")]
    MissingId { kind: CommandKind },

    #[error("{kind}: id is {len} bytes, limit is {max}")]
    IdTooLong { kind: CommandKind, len: usize, max: usize },

    #[error("{kind}: title is required")]
    MissingTitle { kind: CommandKind },

    #[error("{kind}: title is {len} bytes, limit is {max}")]
    TitleTooLong { kind: CommandKind, len: usize, max: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("refusing to encode invalid command: {0}")]
    Invalid(#[from] ValidationError),
}

/// Message bytes on the consume side could not be turned into a command.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{kind}: malformed payload: {source}")]
    Malformed {
        kind: CommandKind,
        #[source]
        source: prost::DecodeError,
    },

    #[error("{kind}: decoded payload violates invariants: {source}")]
    Invalid {
        kind: CommandKind,
        #[source]
        source: ValidationError,
    },
}

// ---------------------------------------------------------------------------
// Broker errors
// ---------------------------------------------------------------------------

/// Category of a broker error. Lets callers decide between retrying,
/// surfacing and shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// Network failure, leader moved, request timed out. Safe to retry.
    Transient,
    /// Unknown topic, record too large, request rejected. Retrying won't help.
    Permanent,
    /// Partition ownership changed under the caller (group rebalance).
    Rebalancing,
    /// Client or group session already closed.
    Closed,
}

impl fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerErrorKind::Transient => f.write_str("transient"),
            BrokerErrorKind::Permanent => f.write_str("permanent"),
            BrokerErrorKind::Rebalancing => f.write_str("rebalancing"),
            BrokerErrorKind::Closed => f.write_str("closed"),
        }
    }
}

/// Error returned by every broker client trait method.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerError {
    kind: BrokerErrorKind,
    message: String,
}

impl BrokerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Transient, message: msg.into() }
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Permanent, message: msg.into() }
    }

    pub fn rebalancing(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Rebalancing, message: msg.into() }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Closed, message: msg.into() }
    }

    pub fn kind(&self) -> BrokerErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.kind == BrokerErrorKind::Transient
    }

    /// Add context to the error, preserving the kind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }
}

impl fmt::Debug for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BrokerError {}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        Self::transient(e.to_string())
    }
}
