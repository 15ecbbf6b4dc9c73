//! Message model for conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chat::core::ids::MessageId;

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

impl Role {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// A file uploaded to the server and attached to a conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileAttachment {
    /// Server-side file id; unique within a conversation.
    pub file_id: String,
    /// Original file name.
    pub filename: String,
    /// MIME type, if known.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Size in bytes, if known.
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Upload timestamp as reported by the server.
    #[serde(default)]
    pub upload_timestamp: Option<String>,
}

impl FileAttachment {
    /// Minimal attachment record.
    #[must_use]
    pub fn new(file_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            filename: filename.into(),
            mime_type: None,
            file_size: None,
            upload_timestamp: None,
        }
    }
}

/// Thread identity returned by the server for a message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    /// Server-issued thread id.
    pub thread_id: String,
    /// Session id used for every request sent inside the thread; empty
    /// when an older client never stored it.
    #[serde(default)]
    pub thread_session_id: String,
    /// Message the thread is rooted at.
    #[serde(default)]
    pub parent_message_id: Option<String>,
}

/// A single chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// True while the message still receives streamed content.
    #[serde(default)]
    pub is_streaming: bool,
    /// Files attached when the message was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<FileAttachment>>,
    /// Message was sent inside a thread.
    #[serde(default)]
    pub is_thread_message: bool,
    /// Thread the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Message the thread hangs off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    /// Thread rooted at this message, once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_info: Option<ThreadInfo>,
    /// Server reported that a thread can be opened from this message.
    #[serde(default)]
    pub supports_threading: bool,
    /// Server-assigned message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_message_id: Option<String>,
    /// Non-streamed audio payload (base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Format of `audio`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<String>,
}

impl Message {
    fn base(role: Role, content: String, is_streaming: bool) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: Utc::now(),
            is_streaming,
            attachments: None,
            is_thread_message: false,
            thread_id: None,
            parent_message_id: None,
            thread_info: None,
            supports_threading: false,
            database_message_id: None,
            audio: None,
            audio_format: None,
        }
    }

    /// Build a finalized user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content.into(), false)
    }

    /// Build a finalized assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content.into(), false)
    }

    /// Build an empty assistant message that is still streaming.
    #[must_use]
    pub fn assistant_placeholder() -> Self {
        Self::base(Role::Assistant, String::new(), true)
    }

    /// Attach a snapshot of files.
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<FileAttachment>) -> Self {
        if !attachments.is_empty() {
            self.attachments = Some(attachments);
        }
        self
    }

    /// Tag the message as part of a thread.
    #[must_use]
    pub fn in_thread(mut self, thread_id: impl Into<String>, parent: Option<String>) -> Self {
        self.is_thread_message = true;
        self.thread_id = Some(thread_id.into());
        self.parent_message_id = parent;
        self
    }

    /// Id the server knows this message by, falling back to the local id.
    #[must_use]
    pub fn server_id(&self) -> &str {
        self.database_message_id
            .as_deref()
            .unwrap_or_else(|| self.id.as_str())
    }

    /// Whether the message counts toward retention quotas.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        !self.is_streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_streaming() {
        let msg = Message::assistant_placeholder();
        assert!(msg.is_streaming);
        assert!(msg.content.is_empty());
        assert!(!msg.is_finalized());
    }

    #[test]
    fn test_server_id_prefers_database_id() {
        let mut msg = Message::assistant("hi");
        assert_eq!(msg.server_id(), msg.id.as_str());
        msg.database_message_id = Some("db-42".to_string());
        assert_eq!(msg.server_id(), "db-42");
    }

    #[test]
    fn test_empty_attachments_not_recorded() {
        let msg = Message::user("hi").with_attachments(Vec::new());
        assert!(msg.attachments.is_none());
    }

    #[test]
    fn test_deserialize_legacy_payload() {
        let json = r#"{"id":"msg_1","role":"assistant","content":"old","isStreaming":true}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.is_streaming);
        assert!(!msg.supports_threading);
        assert!(msg.thread_info.is_none());
    }

    #[test]
    fn test_camel_case_keys() {
        let json = serde_json::to_string(&Message::user("x")).unwrap();
        assert!(json.contains("\"isStreaming\""));
        assert!(json.contains("\"isThreadMessage\""));
    }
}
