//! Request/response records exchanged through the mailbox.
//!
//! Both records are plain JSON objects. Field names are part of the wire
//! format and must not change: the client and the worker may be built from
//! different revisions.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Prompt used when a request arrives without one (or with only whitespace).
pub const DEFAULT_PROMPT: &str = "Describe what is shown.";

/// Backend capability level requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelTier {
    /// Text-only, low latency.
    #[default]
    #[serde(rename = "flash")]
    Fast,
    /// Multimodal; gets a screenshot or the attached file.
    #[serde(rename = "pro")]
    Capable,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "flash",
            ModelTier::Capable => "pro",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flash" => Ok(ModelTier::Fast),
            "pro" => Ok(ModelTier::Capable),
            other => Err(format!("unknown model '{}' (expected 'flash' or 'pro')", other)),
        }
    }
}

/// A query written by the client into the request slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default = "default_prompt", deserialize_with = "prompt_or_default")]
    pub prompt: String,
    #[serde(default)]
    pub model: ModelTier,
    #[serde(default, alias = "pdf_path")]
    pub attachment_path: Option<PathBuf>,
    #[serde(default, alias = "chat_name")]
    pub chat_name: Option<String>,
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn prompt_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let prompt = Option::<String>::deserialize(deserializer)?;
    Ok(match prompt {
        Some(p) if !p.trim().is_empty() => p,
        _ => default_prompt(),
    })
}

impl Request {
    pub fn new(prompt: impl Into<String>, model: ModelTier) -> Self {
        let prompt = prompt.into();
        Self {
            prompt: if prompt.trim().is_empty() {
                default_prompt()
            } else {
                prompt
            },
            model,
            attachment_path: None,
            chat_name: None,
        }
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment_path = Some(path.into());
        self
    }

    pub fn with_chat(mut self, name: impl Into<String>) -> Self {
        self.chat_name = Some(name.into());
        self
    }
}

/// The worker's answer, written into the response slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub response: String,
    #[serde(default)]
    pub error: bool,
}

impl Response {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            response: text.into(),
            error: false,
        }
    }

    pub fn failure(diagnostic: impl Into<String>) -> Self {
        Self {
            response: diagnostic.into(),
            error: true,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error
    }
}
