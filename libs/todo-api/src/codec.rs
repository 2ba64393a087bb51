//! Wire encoding of commands.
//!
//! Values are protobuf messages (field-tagged), so optional fields can be
//! added later without breaking older readers: unknown tags are skipped on
//! decode. Field numbers below are part of the wire contract.

use prost::Message;

use crate::command::{Command, CommandKind};
use crate::error::{DecodeError, EncodeError};

#[derive(Clone, PartialEq, Message)]
pub struct TodoCreate {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub title: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TodoUpdate {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub title: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TodoDelete {
    #[prost(string, tag = "1")]
    pub id: String,
}

/// Encode a command into its wire value. Invalid commands are refused.
pub fn encode(command: &Command) -> Result<Vec<u8>, EncodeError> {
    command.validate()?;
    let bytes = match command {
        Command::Create { id, title } => TodoCreate { id: id.clone(), title: title.clone() }.encode_to_vec(),
        Command::Update { id, title } => TodoUpdate { id: id.clone(), title: title.clone() }.encode_to_vec(),
        Command::Delete { id } => TodoDelete { id: id.clone() }.encode_to_vec(),
    };
    Ok(bytes)
}

/// Decode a wire value of the given kind. Never panics on malformed input.
pub fn decode(kind: CommandKind, bytes: &[u8]) -> Result<Command, DecodeError> {
    let malformed = |source| DecodeError::Malformed { kind, source };
    let command = match kind {
        CommandKind::Create => {
            let msg = TodoCreate::decode(bytes).map_err(malformed)?;
            Command::Create { id: msg.id, title: msg.title }
        }
        CommandKind::Update => {
            let msg = TodoUpdate::decode(bytes).map_err(malformed)?;
            Command::Update { id: msg.id, title: msg.title }
        }
        CommandKind::Delete => {
            let msg = TodoDelete::decode(bytes).map_err(malformed)?;
            Command::Delete { id: msg.id }
        }
    };
    command
        .validate()
        .map_err(|source| DecodeError::Invalid { kind, source })?;
    Ok(command)
}
