//! Network client seam.
//!
//! The conversation manager never talks HTTP directly; it goes through
//! [`ChatClient`]. [`HttpChatClient`] is the ORBIT implementation, tests
//! plug in scripted clients.

pub mod http;
pub mod wire;

use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::chat::core::conversation::{AdapterInfo, Credential};
use crate::chat::core::errors::ChatResult;
use crate::chat::core::message::ThreadInfo;

pub use http::HttpChatClient;

/// Boxed future type for client operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of response chunks for one request.
pub type ResponseStream = BoxStream<'static, ChatResult<ResponseChunk>>;

/// Endpoint, credential and session a request is sent with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientBinding {
    /// Server base URL.
    pub api_url: String,
    /// API key or adapter name.
    pub credential: Credential,
    /// Conversation or thread session id.
    pub session_id: String,
}

/// One chat request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChatRequest {
    /// User message.
    pub message: String,
    /// Files the server may read.
    pub file_ids: Vec<String>,
    /// Thread the message is sent in.
    pub thread_id: Option<String>,
    /// Spoken language hint.
    pub language: Option<String>,
    /// Ask for audio in the response.
    pub return_audio: bool,
    /// TTS voice.
    pub tts_voice: Option<String>,
}

/// Threading capability reported with the completion signal.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingMetadata {
    /// A thread can be opened from the response.
    pub supports_threading: bool,
    /// Server-assigned id of the assistant message.
    pub message_id: Option<String>,
    /// Session the message was stored under.
    pub session_id: Option<String>,
}

/// Partial response record.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseChunk {
    /// Text delta.
    #[serde(alias = "text", alias = "content")]
    pub response: Option<String>,
    /// Streamed audio segment (base64).
    pub audio_chunk: Option<String>,
    /// Position of `audio_chunk` in the audio stream.
    pub chunk_index: Option<u32>,
    /// Format of `audio_chunk` or `audio`.
    #[serde(rename = "audioFormat", alias = "audio_format")]
    pub audio_format: Option<String>,
    /// Non-streamed audio for the whole response (base64).
    pub audio: Option<String>,
    /// Completion signal.
    pub done: bool,
    /// Threading capability.
    pub threading: Option<ThreadingMetadata>,
    /// Error reported in-band by the server.
    pub error: Option<String>,
}

impl ResponseChunk {
    /// Text delta chunk.
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            response: Some(delta.into()),
            ..Self::default()
        }
    }

    /// Streamed audio chunk.
    #[must_use]
    pub fn audio_segment(audio: impl Into<String>, index: u32, format: impl Into<String>) -> Self {
        Self {
            audio_chunk: Some(audio.into()),
            chunk_index: Some(index),
            audio_format: Some(format.into()),
            ..Self::default()
        }
    }

    /// Completion signal.
    #[must_use]
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Status of an API key as reported by the server.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyStatus {
    /// Key is known.
    pub exists: bool,
    /// Key is enabled.
    pub active: bool,
    /// Adapter the key routes to.
    pub adapter_name: Option<String>,
    /// Client the key belongs to.
    pub client_name: Option<String>,
}

/// Outcome of a remote conversation deletion.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeletionReport {
    /// Messages removed from server-side history.
    pub deleted_messages: u64,
    /// Files removed.
    pub deleted_files: u64,
    /// Per-file failures as `file_id: reason`.
    pub file_errors: Vec<String>,
}

/// Network client collaborator.
pub trait ChatClient: Send + Sync {
    /// Rebind the credential and session used by [`ChatClient::stream_chat`].
    ///
    /// # Errors
    /// Returns an error if the binding cannot be applied.
    fn configure(&self, binding: ClientBinding) -> ClientFuture<'_, ChatResult<()>>;

    /// Check an API key against the server.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn validate_api_key(
        &self,
        api_url: &str,
        api_key: &str,
    ) -> ClientFuture<'_, ChatResult<ApiKeyStatus>>;

    /// Fetch adapter metadata for a binding.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn adapter_info(&self, binding: &ClientBinding) -> ClientFuture<'_, ChatResult<AdapterInfo>>;

    /// Send a message with the active binding and stream the response.
    ///
    /// # Errors
    /// Returns an error if the request cannot be started.
    fn stream_chat(&self, request: ChatRequest) -> ClientFuture<'_, ChatResult<ResponseStream>>;

    /// Delete a session's history and the given files.
    ///
    /// # Errors
    /// Returns an error if the history deletion fails; file failures are
    /// reported in the [`DeletionReport`].
    fn delete_conversation_with_files(
        &self,
        binding: &ClientBinding,
        file_ids: Vec<String>,
    ) -> ClientFuture<'_, ChatResult<DeletionReport>>;

    /// Clear a session's history without touching files.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn clear_conversation(&self, binding: &ClientBinding) -> ClientFuture<'_, ChatResult<()>>;

    /// Open a thread rooted at a stored message.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn create_thread(
        &self,
        binding: &ClientBinding,
        message_id: &str,
        session_id: &str,
    ) -> ClientFuture<'_, ChatResult<ThreadInfo>>;
}
