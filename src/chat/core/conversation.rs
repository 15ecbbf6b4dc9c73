//! Conversation model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::config::CredentialMode;
use crate::chat::core::ids::{ConversationId, MessageId, SessionId};
use crate::chat::core::message::{FileAttachment, Message, Role};

/// Title given to conversations before the first user message.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum title length derived from the first user message.
pub const TITLE_MAX_CHARS: usize = 50;

/// Credential bound to a conversation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Credential {
    /// Direct-key mode.
    ApiKey(String),
    /// Middleware adapter mode.
    AdapterName(String),
    /// Nothing bound yet.
    #[default]
    Unset,
}

impl Credential {
    /// API key, if this is a direct-key credential.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::ApiKey(key) => Some(key),
            _ => None,
        }
    }

    /// Adapter name, if this is an adapter credential.
    #[must_use]
    pub fn adapter_name(&self) -> Option<&str> {
        match self {
            Self::AdapterName(name) => Some(name),
            _ => None,
        }
    }

    /// Nothing bound yet.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Whether the credential is non-empty and matches `mode`.
    #[must_use]
    pub fn is_usable_in(&self, mode: CredentialMode) -> bool {
        match (self, mode) {
            (Self::ApiKey(key), CredentialMode::DirectKey) => !key.trim().is_empty(),
            (Self::AdapterName(name), CredentialMode::Adapter) => !name.trim().is_empty(),
            _ => false,
        }
    }
}

/// Adapter metadata reported by the server; opaque beyond a few common keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Client the API key or adapter belongs to.
    #[serde(default)]
    pub client_name: Option<String>,
    /// Adapter serving the conversation.
    #[serde(default)]
    pub adapter_name: Option<String>,
    /// Model behind the adapter.
    #[serde(default)]
    pub model: Option<String>,
    /// Everything else the server sent.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-conversation audio override.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Ask the server for spoken responses.
    pub enabled: bool,
    /// TTS voice.
    #[serde(default)]
    pub voice: Option<String>,
    /// Spoken language.
    #[serde(default)]
    pub language: Option<String>,
    /// Requested audio format.
    #[serde(default)]
    pub format: Option<String>,
}

/// A titled, independently-credentialed sequence of messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Local identifier.
    pub id: ConversationId,
    /// Server session; `None` only in payloads persisted by older clients.
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Display title.
    #[serde(default = "default_title")]
    pub title: String,
    /// Messages in conversation order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Bound credential.
    #[serde(default)]
    pub credential: Credential,
    /// Server endpoint.
    #[serde(default)]
    pub api_url: String,
    /// Cached adapter metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_info: Option<AdapterInfo>,
    /// Files attached to the conversation, unique by `file_id`.
    #[serde(default)]
    pub attached_files: Vec<FileAttachment>,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Audio override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_settings: Option<AudioSettings>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl Conversation {
    /// Create an empty conversation.
    #[must_use]
    pub fn new(credential: Credential, api_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            session_id: Some(SessionId::new()),
            title: default_title(),
            messages: Vec::new(),
            credential,
            api_url: api_url.into(),
            adapter_info: None,
            attached_files: Vec::new(),
            created_at: now,
            updated_at: now,
            audio_settings: None,
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Session id, generating one if the conversation predates session ids.
    pub fn ensure_session_id(&mut self) -> SessionId {
        *self.session_id.get_or_insert_with(SessionId::new)
    }

    /// Whether any message is still streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|m| m.is_streaming)
    }

    /// Number of finalized messages.
    #[must_use]
    pub fn finalized_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_finalized()).count()
    }

    /// Borrow a message by id.
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Mutably borrow a message by id.
    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// File ids attached to the conversation.
    #[must_use]
    pub fn file_ids(&self) -> Vec<String> {
        self.attached_files.iter().map(|f| f.file_id.clone()).collect()
    }

    /// Attach a file, replacing any record with the same `file_id`.
    pub fn attach_file(&mut self, file: FileAttachment) {
        if let Some(existing) = self
            .attached_files
            .iter_mut()
            .find(|f| f.file_id == file.file_id)
        {
            *existing = file;
        } else {
            self.attached_files.push(file);
        }
    }

    /// Derive the title from the first user message if it is still the default.
    pub fn title_from_first_message(&mut self) {
        if self.title != DEFAULT_TITLE {
            return;
        }
        let Some(first) = self.messages.iter().find(|m| m.role == Role::User) else {
            return;
        };
        let trimmed = first.content.trim();
        if trimmed.is_empty() {
            return;
        }
        self.title = if trimmed.chars().count() > TITLE_MAX_CHARS {
            let prefix: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
            format!("{prefix}...")
        } else {
            trimmed.to_string()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation::new(Credential::ApiKey("k".to_string()), "http://localhost:3000")
    }

    #[test]
    fn test_attach_file_replaces_same_id() {
        let mut conv = conversation();
        conv.attach_file(FileAttachment::new("f1", "a.pdf"));
        conv.attach_file(FileAttachment::new("f1", "renamed.pdf"));
        conv.attach_file(FileAttachment::new("f2", "b.pdf"));
        assert_eq!(conv.attached_files.len(), 2);
        assert_eq!(conv.attached_files[0].filename, "renamed.pdf");
    }

    #[test]
    fn test_title_truncated_from_first_user_message() {
        let mut conv = conversation();
        conv.messages.push(Message::user("x".repeat(80)));
        conv.title_from_first_message();
        assert_eq!(conv.title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(conv.title.ends_with("..."));
    }

    #[test]
    fn test_custom_title_kept() {
        let mut conv = conversation();
        conv.title = "Mine".to_string();
        conv.messages.push(Message::user("hello"));
        conv.title_from_first_message();
        assert_eq!(conv.title, "Mine");
    }

    #[test]
    fn test_credential_usable_only_in_matching_mode() {
        let key = Credential::ApiKey("k".to_string());
        assert!(key.is_usable_in(CredentialMode::DirectKey));
        assert!(!key.is_usable_in(CredentialMode::Adapter));
        assert!(!Credential::AdapterName("  ".to_string()).is_usable_in(CredentialMode::Adapter));
        assert!(!Credential::Unset.is_usable_in(CredentialMode::DirectKey));
    }

    #[test]
    fn test_credential_json_shape() {
        let json = serde_json::to_string(&Credential::AdapterName("qa".to_string())).unwrap();
        assert_eq!(json, r#"{"adapterName":"qa"}"#);
    }

    #[test]
    fn test_missing_session_id_deserializes() {
        let json = format!(r#"{{"id":"{}"}}"#, ConversationId::new());
        let mut conv: Conversation = serde_json::from_str(&json).unwrap();
        assert!(conv.session_id.is_none());
        assert_eq!(conv.title, DEFAULT_TITLE);
        let session = conv.ensure_session_id();
        assert_eq!(conv.session_id, Some(session));
    }
}
