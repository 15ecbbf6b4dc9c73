//! Core conversation types and identifiers.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;

pub use config::{
    ChatConfig, CredentialMode, CredentialSettings, QuotaConfig, StorageConfig, StreamingConfig,
};
pub use conversation::{AdapterInfo, AudioSettings, Conversation, Credential, DEFAULT_TITLE};
pub use errors::{ChatError, ChatResult};
pub use ids::{ConversationId, MessageId, SessionId};
pub use message::{FileAttachment, Message, Role, ThreadInfo};
