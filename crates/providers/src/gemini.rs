use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::chat::{Part, Role, Turn};
use shared::collaborators::{GenerativeBackend, StreamChunk};
use shared::protocol::ModelTier;
use shared::settings::ModelSettings;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::sse::SseParser;

pub(crate) const API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Finish reasons that mean the model refused to answer.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    File { file_data: GeminiFileData },
}

#[derive(Debug, Serialize)]
struct GeminiFileData {
    mime_type: String,
    file_uri: String,
}

// ── Streaming response types ─────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    error: Option<GeminiApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiApiError {
    #[serde(default)]
    pub(crate) code: Option<i64>,
    #[serde(default)]
    pub(crate) message: String,
}

// ── Conversion ───────────────────────────────────────────────────────

fn to_gemini_parts(parts: &[Part]) -> Vec<GeminiPart> {
    parts
        .iter()
        .map(|p| match p {
            Part::Text { text } => GeminiPart::Text { text: text.clone() },
            Part::File { file_data } => GeminiPart::File {
                file_data: GeminiFileData {
                    mime_type: file_data.mime_type.clone(),
                    file_uri: file_data.file_uri.clone(),
                },
            },
        })
        .collect()
}

fn build_request(history: &[Turn], content: &[Part]) -> GeminiRequest {
    let mut contents: Vec<GeminiContent> = history
        .iter()
        .map(|turn| GeminiContent {
            role: match turn.role {
                Role::User => "user",
                Role::Model => "model",
            },
            parts: to_gemini_parts(&turn.parts),
        })
        .collect();
    contents.push(GeminiContent {
        role: "user",
        parts: to_gemini_parts(content),
    });
    GeminiRequest { contents }
}

/// Text and finish reason carried by one stream event.
#[derive(Debug, Default, PartialEq, Eq)]
struct StreamDelta {
    text: String,
    finish_reason: Option<String>,
}

fn parse_stream_event(data: &str) -> Result<StreamDelta, String> {
    let resp: GeminiStreamResponse = serde_json::from_str(data)
        .map_err(|e| format!("Failed to parse Gemini stream: {}", e))?;

    if let Some(err) = resp.error {
        return Err(match err.code {
            Some(code) => format!("gemini error {}: {}", code, err.message),
            None => format!("gemini error: {}", err.message),
        });
    }
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(format!("Prompt was blocked by Gemini ({})", reason));
    }

    let mut delta = StreamDelta::default();
    if let Some(candidate) = resp.candidates.into_iter().next() {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(text) = part.text {
                    delta.text.push_str(&text);
                }
            }
        }
        delta.finish_reason = candidate.finish_reason;
    }
    Ok(delta)
}

/// Shorten an HTTP error body for display.
pub(crate) fn error_detail(service: &str, status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    let detail: String = body.trim().chars().take(800).collect();
    if detail.is_empty() {
        anyhow!("{} error: {}", service, status)
    } else {
        anyhow!("{} error: {}\n{}", service, status, detail)
    }
}

pub struct GeminiClient {
    http: Client,
    auth_token: String,
    models: ModelSettings,
    base_url: String,
}

impl GeminiClient {
    pub fn from_settings(settings: &ModelSettings, timeout: Duration) -> Result<Self> {
        let auth_token = settings.gemini_auth.resolve_api_key().ok_or_else(|| {
            anyhow!("No Gemini API key: set model.gemini_auth.api_key or GEMINI_API_KEY")
        })?;
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            auth_token,
            models: settings.clone(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Point at a different endpoint (proxies, regional hosts).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model_name(&self, tier: ModelTier) -> &str {
        self.models.model_for(tier)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_stream(
        &self,
        tier: ModelTier,
        history: &[Turn],
        content: &[Part],
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let model = self.model_name(tier);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );
        let req = build_request(history, content);
        tracing::debug!(
            "Calling {} with {} content entries",
            model,
            req.contents.len()
        );

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.auth_token)
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(error_detail("gemini", status, &body));
        }

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();
        let mut produced_text = false;
        let mut finish_reason = None;

        let mut handle = |data: &str| -> bool {
            match parse_stream_event(data) {
                Ok(delta) => {
                    if !delta.text.is_empty() {
                        produced_text = true;
                        let _ = tx.send(StreamChunk::Text(delta.text));
                    }
                    if delta.finish_reason.is_some() {
                        finish_reason = delta.finish_reason;
                    }
                    true
                }
                Err(message) => {
                    let _ = tx.send(StreamChunk::Error(message));
                    false
                }
            }
        };

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            for event in parser.feed(&bytes) {
                if !handle(&event.data) {
                    return Ok(());
                }
            }
        }
        if let Some(event) = parser.finish() {
            if !handle(&event.data) {
                return Ok(());
            }
        }

        match finish_reason.as_deref() {
            Some(reason) if !produced_text && BLOCKING_FINISH_REASONS.contains(&reason) => {
                let _ = tx.send(StreamChunk::Error(format!(
                    "Gemini declined to answer ({})",
                    reason
                )));
            }
            _ => {
                let _ = tx.send(StreamChunk::Done { finish_reason });
            }
        }
        Ok(())
    }
}
