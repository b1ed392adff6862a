//! In-memory collaborators for unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::chat::{AttachmentRef, Part, Turn};
use shared::collaborators::{ContentStore, GenerativeBackend, ScreenCapturer, StreamChunk};
use shared::protocol::ModelTier;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone)]
pub struct Upload {
    pub path: PathBuf,
    pub mime_type: String,
    pub display_name: String,
}

#[derive(Default)]
pub struct FakeStore {
    fail: bool,
    uploads: Mutex<Vec<Upload>>,
    known: Mutex<Vec<AttachmentRef>>,
    lookups: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().clone()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }

    /// Make previously uploaded files unknown, as if they expired.
    pub fn forget_all(&self) {
        self.known.lock().clear();
    }
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn upload(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<AttachmentRef> {
        if self.fail {
            return Err(anyhow!("quota exceeded"));
        }
        let mut uploads = self.uploads.lock();
        uploads.push(Upload {
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
            display_name: display_name.to_string(),
        });
        let name = format!("files/f{}", uploads.len());
        let attachment = AttachmentRef {
            file_uri: format!("https://files.test/{}", name),
            name,
            mime_type: mime_type.to_string(),
        };
        self.known.lock().push(attachment.clone());
        Ok(attachment)
    }

    async fn lookup(&self, name: &str) -> Result<AttachmentRef> {
        self.lookups.lock().push(name.to_string());
        self.known
            .lock()
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| anyhow!("{} not found", name))
    }
}

#[derive(Default)]
pub struct FakeCapturer {
    fail: bool,
    captures: Mutex<Vec<PathBuf>>,
}

impl FakeCapturer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn captures(&self) -> Vec<PathBuf> {
        self.captures.lock().clone()
    }
}

#[async_trait]
impl ScreenCapturer for FakeCapturer {
    async fn capture(&self, dest: &Path) -> Result<()> {
        self.captures.lock().push(dest.to_path_buf());
        if self.fail {
            return Err(anyhow!("no display"));
        }
        tokio::fs::write(dest, b"\x89PNG\r\n\x1a\n").await?;
        Ok(())
    }
}

/// One recorded generation call.
#[derive(Debug, Clone)]
pub struct Call {
    pub tier: ModelTier,
    pub history: Vec<Turn>,
    pub content: Vec<Part>,
}

impl Call {
    pub fn attachment(&self) -> Option<&AttachmentRef> {
        self.content.iter().find_map(Part::as_attachment)
    }
}

/// What the fake backend does on a call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream the pieces, then `Done`.
    Reply(Vec<&'static str>),
    /// Fail before streaming.
    Reject(&'static str),
    /// Stream the pieces, then an error chunk.
    BreakAfter(Vec<&'static str>),
    /// Stream the pieces and stop without `Done`.
    Truncate(Vec<&'static str>),
    Panic,
}

#[derive(Default)]
pub struct RecordingBackend {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingBackend {
    pub fn replying(replies: &[&'static str]) -> Self {
        let backend = Self::default();
        for reply in replies {
            backend.push(Script::Reply(vec![reply]));
        }
        backend
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GenerativeBackend for RecordingBackend {
    async fn generate_stream(
        &self,
        tier: ModelTier,
        history: &[Turn],
        content: &[Part],
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        self.calls.lock().push(Call {
            tier,
            history: history.to_vec(),
            content: content.to_vec(),
        });
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Reply(vec!["ok"]));

        let send_all = |pieces: &[&str]| {
            for piece in pieces {
                let _ = tx.send(StreamChunk::Text(piece.to_string()));
            }
        };
        match script {
            Script::Reply(pieces) => {
                send_all(&pieces);
                let _ = tx.send(StreamChunk::Done {
                    finish_reason: Some("STOP".into()),
                });
            }
            Script::Reject(message) => return Err(anyhow!(message)),
            Script::BreakAfter(pieces) => {
                send_all(&pieces);
                let _ = tx.send(StreamChunk::Error("connection reset".into()));
            }
            Script::Truncate(pieces) => send_all(&pieces),
            Script::Panic => panic!("backend exploded"),
        }
        Ok(())
    }
}
