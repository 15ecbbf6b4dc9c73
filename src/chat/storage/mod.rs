//! Persisted key-value storage and the background mirror.

pub mod kv;
pub mod mirror;

pub use kv::{InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore, StoreFuture};
pub use mirror::{MirrorSnapshot, PersistenceMirror};

/// Conversations plus the selected conversation id.
pub const STATE_KEY: &str = "chat-state";
/// Session id of the selected conversation.
pub const SESSION_ID_KEY: &str = "session-id";
/// Last configured API key.
pub const API_KEY_KEY: &str = "api-key";
/// Last configured API URL.
pub const API_URL_KEY: &str = "api-url";
/// Last configured adapter name.
pub const ADAPTER_NAME_KEY: &str = "adapter-name";
