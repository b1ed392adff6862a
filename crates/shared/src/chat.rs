//! Multi-turn conversation state persisted by the worker.

use serde::{Deserialize, Serialize};

/// Handle to content previously uploaded to the backend's file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    /// Store-side identifier, e.g. `files/abc123`. This is what a session
    /// persists as its `fileName`.
    pub name: String,
    /// URI the backend accepts inside a generation request.
    pub file_uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One piece of a turn: either text or a reference to uploaded content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: AttachmentRef,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn file(attachment: AttachmentRef) -> Self {
        Part::File {
            file_data: attachment,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            Part::File { .. } => None,
        }
    }

    pub fn as_attachment(&self) -> Option<&AttachmentRef> {
        match self {
            Part::File { file_data } => Some(file_data),
            Part::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text parts, ignoring attachments.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A named conversation: ordered history plus the last attachment used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub history: Vec<Turn>,
}

impl ChatSession {
    /// Append one completed exchange. History only ever grows by a
    /// user/model pair.
    pub fn record_exchange(&mut self, user_parts: Vec<Part>, reply: impl Into<String>) {
        self.history.push(Turn::user(user_parts));
        self.history.push(Turn::model(reply));
    }

    /// Number of completed exchanges.
    pub fn exchange_count(&self) -> usize {
        self.history.len() / 2
    }
}
