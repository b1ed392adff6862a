//! Narrow interfaces to the external systems the worker depends on.
//!
//! Implementations live in `providers` (Gemini) and `services` (screen
//! capture); tests substitute in-memory fakes.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;

use crate::chat::{AttachmentRef, Part, Turn};
use crate::protocol::ModelTier;

/// Incremental output of a generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Text(String),
    Done { finish_reason: Option<String> },
    Error(String),
}

/// A generative model service.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Generate a reply to `content`, given the prior `history` of the
    /// conversation (empty for one-off requests).
    ///
    /// Output is pushed into `tx`. Returning `Err` means the call failed
    /// before anything was produced; failures after that are reported as
    /// `StreamChunk::Error`. A well-behaved stream ends with `Done`.
    async fn generate_stream(
        &self,
        tier: ModelTier,
        history: &[Turn],
        content: &[Part],
        tx: UnboundedSender<StreamChunk>,
    ) -> anyhow::Result<()>;
}

/// Remote storage for attachments the backend can reference by URI.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Upload a local file and wait until the backend can use it.
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> anyhow::Result<AttachmentRef>;

    /// Resolve a previously returned `AttachmentRef::name`.
    async fn lookup(&self, name: &str) -> anyhow::Result<AttachmentRef>;
}

/// Captures the current display.
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    /// Write a PNG of the current display to `dest`.
    async fn capture(&self, dest: &Path) -> anyhow::Result<()>;
}
