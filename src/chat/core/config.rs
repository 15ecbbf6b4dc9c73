//! Configuration for the conversation manager.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::core::errors::{ChatError, ChatResult};

/// Environment variable selecting the middleware adapter mode.
pub const MIDDLEWARE_ENV: &str = "ORBIT_CHAT_MIDDLEWARE";
/// Environment variable overriding the default API URL.
pub const API_URL_ENV: &str = "ORBIT_CHAT_API_URL";
/// Environment variable overriding the default API key.
pub const API_KEY_ENV: &str = "ORBIT_CHAT_API_KEY";
/// Environment variable overriding the conversation cap.
pub const MAX_CONVERSATIONS_ENV: &str = "ORBIT_CHAT_MAX_CONVERSATIONS";
/// Environment variable overriding the per-conversation message cap.
pub const MAX_MESSAGES_PER_CONVERSATION_ENV: &str = "ORBIT_CHAT_MAX_MESSAGES_PER_CONVERSATION";
/// Environment variable overriding the global message cap.
pub const MAX_TOTAL_MESSAGES_ENV: &str = "ORBIT_CHAT_MAX_TOTAL_MESSAGES";
/// Environment variable overriding the `SQLite` path.
pub const DB_PATH_ENV: &str = "ORBIT_CHAT_DB_PATH";

/// Top-level configuration for the conversation manager.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Credential mode and defaults.
    pub credentials: CredentialSettings,
    /// Retention limits.
    pub quota: QuotaConfig,
    /// Streaming ingestion settings.
    pub streaming: StreamingConfig,
    /// Persisted storage settings.
    pub storage: StorageConfig,
}

impl ChatConfig {
    /// Build the default configuration and apply `ORBIT_CHAT_*` overrides.
    ///
    /// # Errors
    /// Returns an error if an override cannot be parsed or the result is invalid.
    pub fn from_env() -> ChatResult<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(MIDDLEWARE_ENV) {
            config.credentials.mode = if is_true_value(&value) {
                CredentialMode::Adapter
            } else {
                CredentialMode::DirectKey
            };
        }
        if let Ok(value) = std::env::var(API_URL_ENV) {
            config.credentials.default_api_url = value;
        }
        if let Ok(value) = std::env::var(API_KEY_ENV) {
            config.credentials.default_api_key = value;
        }
        if let Some(cap) = parse_cap_env(MAX_CONVERSATIONS_ENV)? {
            config.quota.max_conversations = cap;
        }
        if let Some(cap) = parse_cap_env(MAX_MESSAGES_PER_CONVERSATION_ENV)? {
            config.quota.max_messages_per_conversation = cap;
        }
        if let Some(cap) = parse_cap_env(MAX_TOTAL_MESSAGES_ENV)? {
            config.quota.max_total_messages = cap;
        }
        if let Ok(value) = std::env::var(DB_PATH_ENV) {
            config.storage.sqlite_path = PathBuf::from(value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        let caps = [
            ("quota.max_conversations", self.quota.max_conversations),
            (
                "quota.max_messages_per_conversation",
                self.quota.max_messages_per_conversation,
            ),
            ("quota.max_total_messages", self.quota.max_total_messages),
        ];
        for (name, cap) in caps {
            if cap == Some(0) {
                return Err(ChatError::InvalidConfig(format!("{name} must be > 0")));
            }
        }

        if self.storage.table.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "storage.table must not be empty".to_string(),
            ));
        }

        Url::parse(&self.credentials.default_api_url)?;

        Ok(())
    }
}

/// How conversations authenticate against the server.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Each conversation holds an API key.
    #[default]
    DirectKey,
    /// Each conversation holds a middleware adapter name.
    Adapter,
}

/// Credential mode and the defaults used for new conversations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// Active credential mode.
    pub mode: CredentialMode,
    /// API key seeded into new conversations in direct-key mode.
    pub default_api_key: String,
    /// Server endpoint seeded into new conversations.
    pub default_api_url: String,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            mode: CredentialMode::DirectKey,
            default_api_key: "default-key".to_string(),
            default_api_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Retention limits; `None` means unlimited.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Maximum number of conversations kept.
    pub max_conversations: Option<usize>,
    /// Maximum finalized messages kept per conversation.
    pub max_messages_per_conversation: Option<usize>,
    /// Maximum finalized messages kept across all conversations.
    pub max_total_messages: Option<usize>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_conversations: Some(10),
            max_messages_per_conversation: Some(1000),
            max_total_messages: Some(10_000),
        }
    }
}

impl QuotaConfig {
    /// Configuration with every limit disabled.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_conversations: None,
            max_messages_per_conversation: None,
            max_total_messages: None,
        }
    }
}

/// Streaming ingestion settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Pause inserted after each text delta, in milliseconds.
    pub chunk_delay_ms: u64,
    /// Hard ceiling on the length of a single assistant message, in chars.
    pub max_message_chars: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_delay_ms: 30,
            max_message_chars: 200_000,
        }
    }
}

impl StreamingConfig {
    /// Pacing delay as a `Duration`.
    #[must_use]
    pub const fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

/// Storage configuration for persisted state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Key-value table name.
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("orbit_chat.sqlite"),
            table: "chat_kv".to_string(),
        }
    }
}

fn is_true_value(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse a cap override; `0`, `none` and `unlimited` disable the cap.
fn parse_cap_env(name: &str) -> ChatResult<Option<Option<usize>>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("unlimited") || raw == "0" {
        return Ok(Some(None));
    }
    raw.parse::<usize>()
        .map(|cap| Some(Some(cap)))
        .map_err(|err| ChatError::InvalidConfig(format!("{name}: {err}")))
}
