//! Filesystem mailbox between the `ask` client and the agent server.
//!
//! Each direction is a single-capacity slot backed by one JSON file. The
//! file existing means a record is pending. Writers replace the file
//! atomically (temp file + rename); readers claim it by renaming it away
//! before reading, so a record is consumed exactly once and a reader never
//! deletes a record it has not seen.
//!
//! There is no queueing: a second write before the first is read replaces
//! it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::errors::MailboxError;
use shared::protocol::{Request, Response};
use shared::settings::{REQUEST_FILE, RESPONSE_FILE};
use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// The request/response slot pair in one directory.
#[derive(Debug, Clone)]
pub struct Mailbox {
    dir: PathBuf,
}

impl Mailbox {
    /// Open (and create if needed) the mailbox directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, MailboxError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| MailboxError::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn requests(&self) -> Slot<Request> {
        Slot::new(self.dir.join(REQUEST_FILE))
    }

    pub fn responses(&self) -> Slot<Response> {
        Slot::new(self.dir.join(RESPONSE_FILE))
    }
}

/// One direction of the mailbox, typed by the record it carries.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> Slot<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a record is waiting to be read.
    pub fn is_pending(&self) -> bool {
        self.path.exists()
    }

    /// Store `record`, replacing whatever was pending.
    pub fn write(&self, record: &T) -> Result<(), MailboxError> {
        let write_err = |source| MailboxError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        let bytes = serde_json::to_vec(record).map_err(|e| write_err(e.into()))?;
        tmp.write_all(&bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    /// Take the pending record, if any. The slot is empty afterwards, even
    /// when the record turns out to be malformed.
    pub fn try_read(&self) -> Result<Option<T>, MailboxError> {
        let claimed = self.claim_path();
        match fs::rename(&self.path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MailboxError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        }

        let bytes = fs::read(&claimed);
        if let Err(e) = fs::remove_file(&claimed) {
            tracing::warn!("Could not remove claimed record {}: {}", claimed.display(), e);
        }
        let bytes = bytes.map_err(|source| MailboxError::Read {
            path: self.path.clone(),
            source,
        })?;

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| MailboxError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Drop a pending record without reading it.
    pub fn clear(&self) -> Result<(), MailboxError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(MailboxError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Check the slot every `interval` until a record arrives or `timeout`
    /// elapses. Read and parse errors end the wait immediately.
    pub async fn poll_until(&self, interval: Duration, timeout: Duration) -> Result<T, MailboxError> {
        let started = Instant::now();
        loop {
            if let Some(record) = self.try_read()? {
                return Ok(record);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(MailboxError::Timeout {
                    path: self.path.clone(),
                    waited,
                });
            }
            tokio::time::sleep(interval.min(timeout - waited)).await;
        }
    }

    fn claim_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".claimed-{}", std::process::id()));
        self.path.with_file_name(name)
    }
}
