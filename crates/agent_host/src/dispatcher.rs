//! Request handling: picks the model tier and payload for each request,
//! runs the backend, and turns every outcome into a `Response`.
//!
//! | Request                          | Tier    | Payload                    |
//! |----------------------------------|---------|----------------------------|
//! | flash, no attachment             | flash   | text                       |
//! | pro, no attachment               | pro     | text + fresh screenshot    |
//! | attachment path (any model)      | pro     | text + uploaded file       |
//! | chat name                        | as above, plus the chat's last attachment when nothing new was added |

use shared::chat::{AttachmentRef, Part, Turn};
use shared::collaborators::{GenerativeBackend, StreamChunk};
use shared::errors::DispatchError;
use shared::protocol::{ModelTier, Request, Response};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::attachments::AttachmentResolver;
use crate::sessions::{AttachmentChange, ChatSessionStore};

/// Where this turn's visual context comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualSource {
    None,
    File(PathBuf),
    Screen,
}

/// Effective tier and visual source for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub tier: ModelTier,
    pub visual: VisualSource,
}

impl Route {
    pub fn for_request(request: &Request) -> Self {
        match (&request.attachment_path, request.model) {
            (Some(path), _) => Route {
                tier: ModelTier::Capable,
                visual: VisualSource::File(path.clone()),
            },
            (None, ModelTier::Capable) => Route {
                tier: ModelTier::Capable,
                visual: VisualSource::Screen,
            },
            (None, ModelTier::Fast) => Route {
                tier: ModelTier::Fast,
                visual: VisualSource::None,
            },
        }
    }
}

pub struct RequestHandler {
    backend: Arc<dyn GenerativeBackend>,
    attachments: AttachmentResolver,
    sessions: ChatSessionStore,
}

impl RequestHandler {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        attachments: AttachmentResolver,
        sessions: ChatSessionStore,
    ) -> Self {
        Self {
            backend,
            attachments,
            sessions,
        }
    }

    pub fn sessions(&self) -> &ChatSessionStore {
        &self.sessions
    }

    /// Handle one request. Never fails: errors become error responses.
    pub async fn handle(&mut self, request: Request) -> Response {
        let route = Route::for_request(&request);
        tracing::info!(
            "Request: model={} (using {}), chat={}, attachment={}",
            request.model,
            route.tier,
            request.chat_name.as_deref().unwrap_or("-"),
            request
                .attachment_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        );

        let result = match request.chat_name.as_deref() {
            Some(chat) => self.chat_turn(chat, &request.prompt, &route).await,
            None => self.one_off(&request.prompt, &route).await,
        };

        match result {
            Ok(text) => Response::success(text),
            Err(e) => {
                tracing::error!("Request failed: {}", e);
                Response::failure(format!("An error occurred on the server:\n\n{}", e))
            }
        }
    }

    async fn one_off(&self, prompt: &str, route: &Route) -> Result<String, DispatchError> {
        let attachment = self.resolve_visual(&route.visual).await?;
        let content = build_content(prompt, attachment.as_ref());
        self.generate(route.tier, &[], &content).await
    }

    async fn chat_turn(
        &mut self,
        chat: &str,
        prompt: &str,
        route: &Route,
    ) -> Result<String, DispatchError> {
        let session = self.sessions.load(chat);

        let uploaded = self.resolve_visual(&route.visual).await?;
        let mut change = match &uploaded {
            Some(fresh) => AttachmentChange::Replace(fresh),
            None => AttachmentChange::Keep,
        };
        let attachment = match (&uploaded, &session.file_name) {
            (Some(fresh), _) => Some(fresh.clone()),
            (None, Some(name)) => match self.attachments.reuse(name).await {
                Ok(previous) => {
                    tracing::info!("Reusing attachment {} for chat '{}'", name, chat);
                    Some(previous)
                }
                Err(e) => {
                    tracing::warn!(
                        "Chat '{}' attachment is no longer available, continuing without it: {}",
                        chat,
                        e
                    );
                    change = AttachmentChange::Clear;
                    None
                }
            },
            (None, None) => None,
        };

        let history = replayable_history(&session.history, attachment.as_ref());
        let content = build_content(prompt, attachment.as_ref());
        let reply = self.generate(route.tier, &history, &content).await?;

        if let Err(e) = self.sessions.record_exchange(chat, content, &reply, change) {
            // The next successful turn rewrites the whole store.
            tracing::warn!("Chat '{}' answered but not saved: {}", chat, e);
        }
        Ok(reply)
    }

    async fn resolve_visual(
        &self,
        visual: &VisualSource,
    ) -> Result<Option<AttachmentRef>, DispatchError> {
        match visual {
            VisualSource::None => Ok(None),
            VisualSource::File(path) => self.attachments.from_path(path).await.map(Some),
            VisualSource::Screen => self.attachments.from_screen().await.map(Some),
        }
    }

    /// Run the backend and drain its stream to the end.
    async fn generate(
        &self,
        tier: ModelTier,
        history: &[Turn],
        content: &[Part],
    ) -> Result<String, DispatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.backend
            .generate_stream(tier, history, content, tx)
            .await
            .map_err(|e| DispatchError::Backend(format!("{:#}", e)))?;
        collect_stream(rx).await
    }
}

fn build_content(prompt: &str, attachment: Option<&AttachmentRef>) -> Vec<Part> {
    let mut content = vec![Part::text(prompt)];
    if let Some(attachment) = attachment {
        content.push(Part::file(attachment.clone()));
    }
    content
}

/// History as sent to the backend. Remote files expire, so only the
/// attachment confirmed usable this turn is replayed; other file parts are
/// left out. The stored history keeps them.
fn replayable_history(history: &[Turn], live: Option<&AttachmentRef>) -> Vec<Turn> {
    history
        .iter()
        .map(|turn| Turn {
            role: turn.role,
            parts: turn
                .parts
                .iter()
                .filter(|part| match part.as_attachment() {
                    Some(file) => live.is_some_and(|l| l.name == file.name),
                    None => true,
                })
                .cloned()
                .collect(),
        })
        .collect()
}

/// Accumulate a whole reply. Only a stream ending in `Done` is complete.
pub async fn collect_stream(
    mut rx: mpsc::UnboundedReceiver<StreamChunk>,
) -> Result<String, DispatchError> {
    let mut text = String::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::Text(piece) => text.push_str(&piece),
            StreamChunk::Done { .. } => return Ok(text),
            StreamChunk::Error(message) => return Err(DispatchError::Backend(message)),
        }
    }
    Err(DispatchError::Backend(
        "response stream ended before completion".to_string(),
    ))
}
