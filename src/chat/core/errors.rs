//! Error types for the conversation manager.

use thiserror::Error;

/// Conversation manager error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Adapter mode is active but no adapter name was supplied.
    #[error("an adapter name is required when the middleware adapter mode is enabled")]
    AdapterRequired,
    /// The conversation has no usable credential bound to it.
    #[error("no API key or adapter is configured for this conversation")]
    MissingCredential,
    /// The API key is unknown to the server.
    #[error("API key is invalid")]
    InvalidApiKey,
    /// The API key exists but has been deactivated.
    #[error("API key is inactive")]
    InactiveApiKey,
    /// The global conversation cap is already reached.
    #[error("conversation limit reached ({0}); delete a conversation before creating a new one")]
    ConversationLimitReached(usize),
    /// The selected conversation has no messages yet.
    #[error("the current conversation is empty; send a message or delete it before creating a new one")]
    CurrentConversationEmpty,
    /// No conversation with the given id or session.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    /// No message with the given id.
    #[error("message not found: {0}")]
    MessageNotFound(String),
    /// The thread exists but its session id was never stored.
    #[error("thread {0} has no session id")]
    ThreadSessionMissing(String),
    /// Regeneration target is not an assistant message preceded by a user message.
    #[error("cannot regenerate message {0}: it must be an assistant reply to a user message")]
    InvalidRegeneration(String),
    /// The conversation is still receiving a response.
    #[error("conversation {0} is still streaming a response")]
    ConversationBusy(String),
    /// Server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// HTTP transport error.
    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Malformed frame in a streamed response.
    #[error("stream decode error: {0}")]
    Decode(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether the error is meant to be shown to the user verbatim.
    #[must_use]
    pub const fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::AdapterRequired
                | Self::MissingCredential
                | Self::InvalidApiKey
                | Self::InactiveApiKey
                | Self::ConversationLimitReached(_)
                | Self::CurrentConversationEmpty
                | Self::ThreadSessionMissing(_)
                | Self::InvalidRegeneration(_)
                | Self::ConversationBusy(_)
        )
    }
}

/// Convenience result alias for conversation manager operations.
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_actionable_split() {
        assert!(ChatError::AdapterRequired.is_user_actionable());
        assert!(ChatError::ConversationLimitReached(3).is_user_actionable());
        assert!(!ChatError::Decode("bad frame".to_string()).is_user_actionable());
        assert!(
            !ChatError::Http {
                status: 500,
                body: String::new()
            }
            .is_user_actionable()
        );
    }

    #[test]
    fn test_limit_message_names_cap() {
        let err = ChatError::ConversationLimitReached(10);
        assert!(err.to_string().contains("(10)"));
    }
}
