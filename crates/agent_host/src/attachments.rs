//! Attachment resolution: local files and fresh screenshots become
//! uploaded-content references the backend can use.

use shared::chat::AttachmentRef;
use shared::collaborators::{ContentStore, ScreenCapturer};
use shared::errors::DispatchError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct AttachmentResolver {
    store: Arc<dyn ContentStore>,
    capturer: Arc<dyn ScreenCapturer>,
    scratch_dir: PathBuf,
    capture_grace: Duration,
}

impl AttachmentResolver {
    pub fn new(
        store: Arc<dyn ContentStore>,
        capturer: Arc<dyn ScreenCapturer>,
        scratch_dir: impl Into<PathBuf>,
        capture_grace: Duration,
    ) -> Self {
        Self {
            store,
            capturer,
            scratch_dir: scratch_dir.into(),
            capture_grace,
        }
    }

    /// Validate and upload a local file.
    pub async fn from_path(&self, path: &Path) -> Result<AttachmentRef, DispatchError> {
        let path = expand_user_path(path);
        let missing = || DispatchError::MissingFile { path: path.clone() };

        let metadata = tokio::fs::metadata(&path).await.map_err(|_| missing())?;
        if !metadata.is_file() {
            return Err(missing());
        }
        // Existence is not enough; the upload has to be able to read it.
        tokio::fs::File::open(&path).await.map_err(|_| missing())?;

        let mime_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        tracing::info!("Uploading {} ({})", path.display(), mime_type);
        self.store
            .upload(&path, &mime_type, &display_name)
            .await
            .map_err(|e| DispatchError::Upload(format!("{}: {:#}", path.display(), e)))
    }

    /// Wait out the grace period, capture the display, upload it. The
    /// temporary image is removed whatever happens.
    pub async fn from_screen(&self) -> Result<AttachmentRef, DispatchError> {
        if !self.capture_grace.is_zero() {
            tracing::info!(
                "Taking screenshot in {}s, switch to the window to capture",
                self.capture_grace.as_secs()
            );
            tokio::time::sleep(self.capture_grace).await;
        }

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| DispatchError::Upload(format!("screen capture failed: {}", e)))?;
        let shot = self
            .scratch_dir
            .join(format!("screenshot-{}.png", uuid::Uuid::new_v4()));

        let result = self.capture_and_upload(&shot).await;
        if let Err(e) = tokio::fs::remove_file(&shot).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove {}: {}", shot.display(), e);
            }
        }
        result
    }

    async fn capture_and_upload(&self, shot: &Path) -> Result<AttachmentRef, DispatchError> {
        self.capturer
            .capture(shot)
            .await
            .map_err(|e| DispatchError::Upload(format!("screen capture failed: {:#}", e)))?;
        tracing::info!("Screenshot captured");

        let display_name = shot
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "screenshot.png".to_string());
        self.store
            .upload(shot, "image/png", &display_name)
            .await
            .map_err(|e| DispatchError::Upload(format!("screenshot: {:#}", e)))
    }

    /// Resolve an attachment name persisted by an earlier turn.
    pub async fn reuse(&self, name: &str) -> Result<AttachmentRef, DispatchError> {
        self.store
            .lookup(name)
            .await
            .map_err(|e| DispatchError::Upload(format!("{}: {:#}", name, e)))
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_user_path(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    path.to_path_buf()
}
