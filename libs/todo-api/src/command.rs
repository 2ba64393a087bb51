use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::util::new_todo_id;

/// Upper bound for a todo title, in UTF-8 bytes.
pub const MAX_TITLE_BYTES: usize = 255;

/// Upper bound for a todo id, in UTF-8 bytes.
pub const MAX_ID_BYTES: usize = 255;

/// Kind of a domain command. Each kind is published to its own topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Create,
    Update,
    Delete,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Create, CommandKind::Update, CommandKind::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Create => "create",
            CommandKind::Update => "update",
            CommandKind::Delete => "delete",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated domain command, ready to be encoded and published.
///
/// Invariants (checked by [`Command::validate`], enforced by the codec on
/// both encode and decode): `id` is never empty; `title` is non-empty and at
/// most [`MAX_TITLE_BYTES`] for create/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { id: String, title: String },
    Update { id: String, title: String },
    Delete { id: String },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Create { .. } => CommandKind::Create,
            Command::Update { .. } => CommandKind::Update,
            Command::Delete { .. } => CommandKind::Delete,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Command::Create { id, .. } | Command::Update { id, .. } | Command::Delete { id } => id,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Command::Create { title, .. } | Command::Update { title, .. } => Some(title),
            Command::Delete { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.kind();
        validate_id(kind, self.id())?;
        if let Some(title) = self.title() {
            validate_title(kind, title)?;
        }
        Ok(())
    }
}

// Whitespace-only ids and titles count as missing.
fn validate_id(kind: CommandKind, id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::MissingId { kind });
    }
    if id.len() > MAX_ID_BYTES {
        return Err(ValidationError::IdTooLong { kind, len: id.len(), max: MAX_ID_BYTES });
    }
    Ok(())
}

fn validate_title(kind: CommandKind, title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::MissingTitle { kind });
    }
    if title.len() > MAX_TITLE_BYTES {
        return Err(ValidationError::TitleTooLong { kind, len: title.len(), max: MAX_TITLE_BYTES });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handler inputs
// ---------------------------------------------------------------------------

/// Create request. `id` is optional: a fresh one is assigned before publish.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateTodo {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
}

impl CreateTodo {
    pub fn new(title: impl Into<String>) -> Self {
        Self { id: None, title: title.into() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Assign an id if missing and validate.
    pub fn into_command(self) -> Result<Command, ValidationError> {
        let id = match self.id {
            Some(id) => id,
            None => new_todo_id(),
        };
        let command = Command::Create { id, title: self.title };
        command.validate()?;
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTodo {
    pub id: String,
    pub title: String,
}

impl UpdateTodo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into() }
    }

    pub fn into_command(self) -> Result<Command, ValidationError> {
        let command = Command::Update { id: self.id, title: self.title };
        command.validate()?;
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTodo {
    pub id: String,
}

impl DeleteTodo {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn into_command(self) -> Result<Command, ValidationError> {
        let command = Command::Delete { id: self.id };
        command.validate()?;
        Ok(command)
    }
}
