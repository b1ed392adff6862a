//! Error types shared by the client and the worker.

use std::path::PathBuf;
use std::time::Duration;

/// Failures of the filesystem mailbox.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timed out after {}s waiting for {}", waited.as_secs(), path.display())]
    Timeout { path: PathBuf, waited: Duration },
}

impl MailboxError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, MailboxError::Timeout { .. })
    }
}

/// Per-request failures inside the worker. Every variant ends up as an
/// error response; the display text is the diagnostic the user sees.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Attachment not found or not readable: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Backend call failed: {0}")]
    Backend(String),
}

/// Failures of the persisted chat store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Chat store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Chat store could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_mentions_path() {
        let err = DispatchError::MissingFile {
            path: PathBuf::from("/nope/report.pdf"),
        };
        assert!(err.to_string().contains("/nope/report.pdf"));
    }

    #[test]
    fn test_timeout_is_timeout() {
        let err = MailboxError::Timeout {
            path: PathBuf::from("response.json"),
            waited: Duration::from_secs(180),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("180s"));
    }
}
