pub mod chat;
pub mod collaborators;
pub mod errors;
pub mod protocol;

pub mod settings {
    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::env;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use crate::protocol::ModelTier;

    pub const REQUEST_FILE: &str = "prompt.json";
    pub const RESPONSE_FILE: &str = "response.json";
    pub const CHAT_STORE_FILE: &str = "chats.json";
    pub const SETTINGS_FILE: &str = "settings.json";

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct ProviderAuth {
        pub api_key: Option<String>,
    }

    impl ProviderAuth {
        /// Configured key, falling back to `GEMINI_API_KEY`.
        pub fn resolve_api_key(&self) -> Option<String> {
            self.api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .or_else(|| env::var("GEMINI_API_KEY").ok())
                .filter(|k| !k.trim().is_empty())
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ModelSettings {
        pub fast_model: String,    // e.g., "gemini-2.5-flash"
        pub capable_model: String, // e.g., "gemini-2.5-pro"
        pub gemini_auth: ProviderAuth,
    }

    impl ModelSettings {
        pub fn model_for(&self, tier: ModelTier) -> &str {
            match tier {
                ModelTier::Fast => &self.fast_model,
                ModelTier::Capable => &self.capable_model,
            }
        }
    }

    impl Default for ModelSettings {
        fn default() -> Self {
            Self {
                fast_model: "gemini-2.5-flash".into(),
                capable_model: "gemini-2.5-pro".into(),
                gemini_auth: ProviderAuth::default(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct MailboxSettings {
        /// Directory holding both slots; defaults to the app data dir.
        pub dir: Option<PathBuf>,
        pub poll_interval_ms: u64,
        pub client_timeout_secs: u64,
    }

    impl MailboxSettings {
        pub fn poll_interval(&self) -> Duration {
            Duration::from_millis(self.poll_interval_ms.max(10))
        }

        pub fn client_timeout(&self) -> Duration {
            Duration::from_secs(self.client_timeout_secs)
        }
    }

    impl Default for MailboxSettings {
        fn default() -> Self {
            Self {
                dir: None,
                poll_interval_ms: 1000,
                client_timeout_secs: 180, // large PDFs take a while
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct WorkerSettings {
        /// Pause before a screenshot so the operator can switch windows.
        pub capture_grace_secs: u64,
        /// argv template; `{output}` is replaced by the destination path.
        pub screenshot_command: Option<Vec<String>>,
        pub session_store: Option<PathBuf>,
        pub request_timeout_secs: u64,
    }

    impl WorkerSettings {
        pub fn capture_grace(&self) -> Duration {
            Duration::from_secs(self.capture_grace_secs)
        }

        pub fn request_timeout(&self) -> Duration {
            Duration::from_secs(self.request_timeout_secs)
        }
    }

    impl Default for WorkerSettings {
        fn default() -> Self {
            Self {
                capture_grace_secs: 5,
                screenshot_command: None,
                session_store: None,
                request_timeout_secs: 300,
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct AppSettings {
        pub model: ModelSettings,
        pub mailbox: MailboxSettings,
        pub worker: WorkerSettings,
    }

    impl AppSettings {
        /// Load settings from `path`; a missing file yields defaults.
        pub fn load_from(path: &Path) -> Result<Self> {
            match fs::read_to_string(path) {
                Ok(content) => serde_json::from_str(&content)
                    .with_context(|| format!("Invalid settings file {}", path.display())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
                Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
            }
        }

        /// Load from the platform config dir.
        pub fn load() -> Result<Self> {
            Self::load_from(&config_dir().join(SETTINGS_FILE))
        }

        /// Directory holding the mailbox slots. `home` (from the command
        /// line) wins over the settings file.
        pub fn mailbox_dir(&self, home: Option<&Path>) -> PathBuf {
            home.map(Path::to_path_buf)
                .or_else(|| self.mailbox.dir.clone())
                .unwrap_or_else(data_dir)
        }

        pub fn session_store_path(&self, home: Option<&Path>) -> PathBuf {
            match (home, &self.worker.session_store) {
                (Some(home), _) => home.join(CHAT_STORE_FILE),
                (None, Some(path)) => path.clone(),
                (None, None) => self.mailbox_dir(None).join(CHAT_STORE_FILE),
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com.local", "Gemini Ask", "GeminiAsk")
    }

    pub fn config_dir() -> PathBuf {
        project_dirs()
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    pub fn data_dir() -> PathBuf {
        project_dirs()
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"))
    }

}
