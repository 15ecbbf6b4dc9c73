//! Conversation manager and its collaborators.
//!
//! [`ConversationManager::bootstrap`] is the entry point. It rehydrates
//! persisted conversations and exposes the conversation, streaming and
//! thread operations.

pub mod audio;
pub mod bootstrap;
pub mod client;
pub mod core;
pub mod credentials;
pub mod storage;
pub mod store;
pub mod streaming;
pub mod threads;
pub mod tracing;

pub use audio::{AudioChunk, AudioEvent, AudioSink, NoopAudioSink, RecordingAudioSink};
pub use bootstrap::{RepairReport, repair_conversations};
pub use client::{
    ApiKeyStatus, ChatClient, ChatRequest, ClientBinding, ClientFuture, DeletionReport,
    HttpChatClient, ResponseChunk, ResponseStream, ThreadingMetadata,
};
pub use self::core::{
    AdapterInfo, AudioSettings, ChatConfig, ChatError, ChatResult, Conversation, ConversationId,
    Credential, CredentialMode, CredentialSettings, FileAttachment, Message, MessageId,
    QuotaConfig, Role, SessionId, StorageConfig, StreamingConfig, ThreadInfo,
};
pub use credentials::{ConfigureRequest, CredentialResolver};
pub use storage::{InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore};
pub use store::{ChatCollaborators, ChatState, ConversationManager, DeletionSummary};
pub use streaming::{SendOutcome, SendRequest};
pub use self::tracing::init_tracing;
