//! Gemini Files API: uploads attachments and screenshots so generation
//! requests can reference them by URI.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::chat::AttachmentRef;
use shared::collaborators::ContentStore;
use shared::settings::ModelSettings;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

use crate::gemini::{error_detail, GeminiApiError, API_BASE};

const PROCESSING_POLL: Duration = Duration::from_secs(2);
const PROCESSING_LIMIT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<GeminiApiError>,
}

#[derive(Debug, PartialEq, Eq)]
enum FileState {
    Active,
    Processing,
    Failed(String),
}

impl GeminiFile {
    fn state(&self) -> FileState {
        match self.state.as_deref() {
            // Older responses omit state for files that are ready.
            None | Some("ACTIVE") | Some("STATE_UNSPECIFIED") => FileState::Active,
            Some("PROCESSING") => FileState::Processing,
            Some(other) => FileState::Failed(
                self.error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| other.to_string()),
            ),
        }
    }

    fn into_attachment(self) -> Result<AttachmentRef> {
        if self.uri.is_empty() {
            return Err(anyhow!("Gemini returned file {} without a URI", self.name));
        }
        Ok(AttachmentRef {
            name: self.name,
            file_uri: self.uri,
            mime_type: self.mime_type,
        })
    }
}

pub struct GeminiFileStore {
    http: Client,
    auth_token: String,
    base_url: String,
}

impl GeminiFileStore {
    pub fn from_settings(settings: &ModelSettings, timeout: Duration) -> Result<Self> {
        let auth_token = settings.gemini_auth.resolve_api_key().ok_or_else(|| {
            anyhow!("No Gemini API key: set model.gemini_auth.api_key or GEMINI_API_KEY")
        })?;
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            auth_token,
            base_url: API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_file(&self, name: &str) -> Result<GeminiFile> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        let resp = self
            .http
            .get(&url)
            .header("x-goog-api-key", &self.auth_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(error_detail("gemini files", status, &body));
        }
        Ok(resp.json().await?)
    }

    /// Large documents and video are processed server-side before use.
    async fn wait_until_active(&self, mut file: GeminiFile) -> Result<GeminiFile> {
        let started = Instant::now();
        loop {
            match file.state() {
                FileState::Active => return Ok(file),
                FileState::Failed(reason) => {
                    return Err(anyhow!("Gemini could not process {}: {}", file.name, reason))
                }
                FileState::Processing => {
                    if started.elapsed() >= PROCESSING_LIMIT {
                        return Err(anyhow!(
                            "{} still processing after {}s",
                            file.name,
                            PROCESSING_LIMIT.as_secs()
                        ));
                    }
                    tracing::debug!("{} is processing, waiting", file.name);
                    tokio::time::sleep(PROCESSING_POLL).await;
                    file = self.get_file(&file.name).await?;
                }
            }
        }
    }
}

#[async_trait]
impl ContentStore for GeminiFileStore {
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<AttachmentRef> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let size = bytes.len();

        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.auth_token)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        if !start.status().is_success() {
            let status = start.status();
            let body = start.text().await.unwrap_or_default();
            return Err(error_detail("gemini upload", status, &body));
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Gemini did not return an upload URL"))?;

        let finish = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        if !finish.status().is_success() {
            let status = finish.status();
            let body = finish.text().await.unwrap_or_default();
            return Err(error_detail("gemini upload", status, &body));
        }
        let uploaded: UploadResponse = finish.json().await?;
        tracing::info!("Uploaded {} ({} bytes) as {}", display_name, size, uploaded.file.name);

        self.wait_until_active(uploaded.file).await?.into_attachment()
    }

    async fn lookup(&self, name: &str) -> Result<AttachmentRef> {
        let file = self.get_file(name).await?;
        match file.state() {
            FileState::Active => file.into_attachment(),
            FileState::Processing => self.wait_until_active(file).await?.into_attachment(),
            FileState::Failed(reason) => Err(anyhow!("{} is unusable: {}", name, reason)),
        }
    }
}
