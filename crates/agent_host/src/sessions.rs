//! Persistent chat sessions.
//!
//! All sessions live in one JSON file keyed by chat name. The whole file is
//! rewritten after every completed exchange via a temp file and an atomic
//! rename, so a crash leaves either the old or the new store on disk.

use shared::chat::{AttachmentRef, ChatSession, Part};
use shared::errors::StoreError;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Name and size of one stored chat, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub name: String,
    pub exchanges: usize,
    pub has_attachment: bool,
}

/// What a recorded exchange does to the session's attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentChange<'a> {
    Keep,
    /// A file or screenshot was uploaded this turn.
    Replace(&'a AttachmentRef),
    /// The stored attachment is gone from the remote store.
    Clear,
}

pub struct ChatSessionStore {
    path: PathBuf,
    sessions: BTreeMap<String, ChatSession>,
}

impl ChatSessionStore {
    /// Load the store at `path`. A missing file is an empty store; an
    /// unreadable-as-JSON file is moved aside and replaced by an empty one.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let sessions = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(sessions) => sessions,
                Err(e) => {
                    let backup = quarantine(&path)?;
                    tracing::warn!(
                        "Chat store {} is corrupt ({}); moved to {} and starting fresh",
                        path.display(),
                        e,
                        backup.display()
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, sessions })
    }

    /// Load without touching the file, for read-only listings. A corrupt
    /// file is reported rather than moved.
    pub fn open_read_only(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let sessions = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, sessions })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The named session, or a fresh empty one.
    pub fn load(&self, chat_name: &str) -> ChatSession {
        self.sessions.get(chat_name).cloned().unwrap_or_default()
    }

    pub fn get(&self, chat_name: &str) -> Option<&ChatSession> {
        self.sessions.get(chat_name)
    }

    pub fn summaries(&self) -> Vec<ChatSummary> {
        self.sessions
            .iter()
            .map(|(name, session)| ChatSummary {
                name: name.clone(),
                exchanges: session.exchange_count(),
                has_attachment: session.file_name.is_some(),
            })
            .collect()
    }

    /// Append a completed exchange to `chat_name`, apply `attachment` to
    /// the session, and persist the store. The in-memory store is updated
    /// even if writing fails.
    pub fn record_exchange(
        &mut self,
        chat_name: &str,
        user_parts: Vec<Part>,
        reply: &str,
        attachment: AttachmentChange<'_>,
    ) -> Result<(), StoreError> {
        let session = self.sessions.entry(chat_name.to_string()).or_default();
        match attachment {
            AttachmentChange::Keep => {}
            AttachmentChange::Replace(new) => session.file_name = Some(new.name.clone()),
            AttachmentChange::Clear => session.file_name = None,
        }
        session.record_exchange(user_parts, reply);
        self.save()
    }

    /// Write every session to disk atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(&self.sessions)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

/// Move a corrupt store out of the way, keeping it for inspection.
fn quarantine(path: &Path) -> Result<PathBuf, StoreError> {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", stamp));
    let backup = path.with_file_name(name);
    fs::rename(path, &backup).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::chat::Role;
    use tempfile::TempDir;

    fn attachment(name: &str) -> AttachmentRef {
        AttachmentRef {
            name: name.to_string(),
            file_uri: format!("https://files.test/{}", name),
            mime_type: "image/png".into(),
        }
    }

    #[test]
    fn test_unknown_chat_is_fresh() {
        let dir = TempDir::new().unwrap();
        let store = ChatSessionStore::open(dir.path().join("chats.json")).unwrap();
        let session = store.load("ideas");
        assert!(session.history.is_empty());
        assert!(session.file_name.is_none());
        assert!(store.get("ideas").is_none());
    }

    #[test]
    fn test_exchanges_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chats.json");
        {
            let mut store = ChatSessionStore::open(&path).unwrap();
            store
                .record_exchange("ideas", vec![Part::text("q1")], "a1", AttachmentChange::Replace(&attachment("files/1")))
                .unwrap();
            store
                .record_exchange("ideas", vec![Part::text("q2")], "a2", AttachmentChange::Keep)
                .unwrap();
            store
                .record_exchange("other", vec![Part::text("x")], "y", AttachmentChange::Keep)
                .unwrap();
        }

        let store = ChatSessionStore::open(&path).unwrap();
        let ideas = store.load("ideas");
        assert_eq!(ideas.history.len(), 4);
        assert_eq!(ideas.file_name.as_deref(), Some("files/1"));
        let roles: Vec<Role> = ideas.history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User, Role::Model]);
        assert_eq!(ideas.history[3].text(), "a2");

        assert_eq!(
            store.summaries(),
            vec![
                ChatSummary {
                    name: "ideas".into(),
                    exchanges: 2,
                    has_attachment: true
                },
                ChatSummary {
                    name: "other".into(),
                    exchanges: 1,
                    has_attachment: false
                },
            ]
        );
    }

    #[test]
    fn test_new_attachment_replaces_old() {
        let dir = TempDir::new().unwrap();
        let mut store = ChatSessionStore::open(dir.path().join("chats.json")).unwrap();
        store
            .record_exchange("c", vec![Part::text("1")], "1", AttachmentChange::Replace(&attachment("files/a")))
            .unwrap();
        store
            .record_exchange("c", vec![Part::text("2")], "2", AttachmentChange::Replace(&attachment("files/b")))
            .unwrap();
        assert_eq!(store.load("c").file_name.as_deref(), Some("files/b"));

        store
            .record_exchange("c", vec![Part::text("3")], "3", AttachmentChange::Keep)
            .unwrap();
        assert_eq!(store.load("c").file_name.as_deref(), Some("files/b"));

        store
            .record_exchange("c", vec![Part::text("4")], "4", AttachmentChange::Clear)
            .unwrap();
        assert!(store.load("c").file_name.is_none());
        assert_eq!(store.load("c").history.len(), 8);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("chats.json");
        let mut store = ChatSessionStore::open(&path).unwrap();
        store
            .record_exchange("c", vec![Part::text("q")], "a", AttachmentChange::Keep)
            .unwrap();
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("chats.json")]);
    }

    #[test]
    fn test_corrupt_store_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chats.json");
        fs::write(&path, "{\"ideas\": [").unwrap();

        let store = ChatSessionStore::open(&path).unwrap();
        assert!(store.summaries().is_empty());
        assert!(!path.exists());
        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("chats.json.corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_read_only_open_reports_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chats.json");
        fs::write(&path, "nope").unwrap();
        assert!(ChatSessionStore::open_read_only(&path).is_err());
        assert!(path.exists());
    }
}
