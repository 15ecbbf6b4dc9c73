//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use orbit_chat::chat::{
    AdapterInfo, ApiKeyStatus, ChatClient, ChatCollaborators, ChatConfig, ChatError, ChatRequest,
    ChatResult, ClientBinding, ClientFuture, ConversationManager, DeletionReport,
    InMemoryKeyValueStore, KeyValueStore, RecordingAudioSink, ResponseChunk, ResponseStream,
    ThreadInfo,
};
use tokio::sync::mpsc;

/// Canned response for one `stream_chat` call.
pub enum Script {
    /// Items yielded immediately.
    Chunks(Vec<ChatResult<ResponseChunk>>),
    /// Items pushed by the test through the paired sender.
    Gated(mpsc::UnboundedReceiver<ChatResult<ResponseChunk>>),
    /// `stream_chat` itself fails.
    Refuse,
}

/// Sender side of a gated script.
pub type Gate = mpsc::UnboundedSender<ChatResult<ResponseChunk>>;

/// A `stream_chat` call as seen by the client.
#[derive(Clone, Debug)]
pub struct StreamCall {
    pub binding: Option<ClientBinding>,
    pub request: ChatRequest,
}

/// Client that replays scripts and records every call.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    binding: Mutex<Option<ClientBinding>>,
    configured: Mutex<Vec<ClientBinding>>,
    streams: Mutex<Vec<StreamCall>>,
    deleted: Mutex<Vec<String>>,
    cleared: Mutex<Vec<String>>,
    threads: Mutex<Vec<(String, String)>>,
    failing_sessions: Mutex<HashSet<String>>,
    key_status: Mutex<Option<ApiKeyStatus>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response made of `chunks`.
    pub fn push_chunks(&self, chunks: Vec<ResponseChunk>) {
        self.push(Script::Chunks(chunks.into_iter().map(Ok).collect()));
    }

    /// Queue a response the test feeds through the returned sender.
    pub fn push_gate(&self) -> Gate {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Gated(rx));
        tx
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn set_key_status(&self, status: ApiKeyStatus) {
        *self.key_status.lock().unwrap() = Some(status);
    }

    pub fn fail_deletion_for(&self, session_id: &str) {
        self.failing_sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string());
    }

    pub fn configured(&self) -> Vec<ClientBinding> {
        self.configured.lock().unwrap().clone()
    }

    pub fn streams(&self) -> Vec<StreamCall> {
        self.streams.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.cleared.lock().unwrap().clone()
    }

    pub fn threads(&self) -> Vec<(String, String)> {
        self.threads.lock().unwrap().clone()
    }
}

impl ChatClient for ScriptedClient {
    fn configure(&self, binding: ClientBinding) -> ClientFuture<'_, ChatResult<()>> {
        self.configured.lock().unwrap().push(binding.clone());
        *self.binding.lock().unwrap() = Some(binding);
        Box::pin(async { Ok(()) })
    }

    fn validate_api_key(
        &self,
        _api_url: &str,
        _api_key: &str,
    ) -> ClientFuture<'_, ChatResult<ApiKeyStatus>> {
        let status = self
            .key_status
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(ApiKeyStatus {
                exists: true,
                active: true,
                adapter_name: None,
                client_name: Some("tests".to_string()),
            });
        Box::pin(async move { Ok(status) })
    }

    fn adapter_info(&self, _binding: &ClientBinding) -> ClientFuture<'_, ChatResult<AdapterInfo>> {
        Box::pin(async {
            Ok(AdapterInfo {
                adapter_name: Some("scripted".to_string()),
                model: Some("test-model".to_string()),
                ..AdapterInfo::default()
            })
        })
    }

    fn stream_chat(&self, request: ChatRequest) -> ClientFuture<'_, ChatResult<ResponseStream>> {
        let binding = self.binding.lock().unwrap().clone();
        self.streams.lock().unwrap().push(StreamCall { binding, request });
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Script::Chunks(vec![Ok(ResponseChunk::text("ok")), Ok(ResponseChunk::done())])
            });

        Box::pin(async move {
            match script {
                Script::Chunks(items) => Ok(stream::iter(items).boxed()),
                Script::Gated(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })
                .boxed()),
                Script::Refuse => Err(ChatError::Http {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
            }
        })
    }

    fn delete_conversation_with_files(
        &self,
        binding: &ClientBinding,
        file_ids: Vec<String>,
    ) -> ClientFuture<'_, ChatResult<DeletionReport>> {
        let session_id = binding.session_id.clone();
        let fails = self.failing_sessions.lock().unwrap().contains(&session_id);
        self.deleted.lock().unwrap().push(session_id.clone());
        Box::pin(async move {
            if fails {
                return Err(ChatError::Http {
                    status: 500,
                    body: format!("cannot delete {session_id}"),
                });
            }
            Ok(DeletionReport {
                deleted_messages: 2,
                deleted_files: file_ids.len() as u64,
                file_errors: Vec::new(),
            })
        })
    }

    fn clear_conversation(&self, binding: &ClientBinding) -> ClientFuture<'_, ChatResult<()>> {
        self.cleared.lock().unwrap().push(binding.session_id.clone());
        Box::pin(async { Ok(()) })
    }

    fn create_thread(
        &self,
        _binding: &ClientBinding,
        message_id: &str,
        session_id: &str,
    ) -> ClientFuture<'_, ChatResult<ThreadInfo>> {
        self.threads
            .lock()
            .unwrap()
            .push((message_id.to_string(), session_id.to_string()));
        let info = ThreadInfo {
            thread_id: "thread-1".to_string(),
            thread_session_id: "thread-session".to_string(),
            parent_message_id: Some(message_id.to_string()),
        };
        Box::pin(async move { Ok(info) })
    }
}

/// Everything a test needs to drive and inspect a manager.
pub struct Harness {
    pub manager: Arc<ConversationManager>,
    pub client: Arc<ScriptedClient>,
    pub audio: Arc<RecordingAudioSink>,
    pub storage: Arc<InMemoryKeyValueStore>,
}

/// Default configuration without chunk pacing.
pub fn config() -> ChatConfig {
    let mut config = ChatConfig::default();
    config.streaming.chunk_delay_ms = 0;
    config
}

pub async fn harness(config: ChatConfig) -> Harness {
    harness_with_storage(config, Arc::new(InMemoryKeyValueStore::new())).await
}

pub async fn harness_with_storage(
    config: ChatConfig,
    storage: Arc<InMemoryKeyValueStore>,
) -> Harness {
    let client = ScriptedClient::new();
    let audio = Arc::new(RecordingAudioSink::new());
    let collaborators = ChatCollaborators {
        client: client.clone(),
        audio: audio.clone(),
        storage: storage.clone() as Arc<dyn KeyValueStore>,
    };
    let manager = ConversationManager::bootstrap(config, collaborators)
        .await
        .unwrap();
    Harness {
        manager: Arc::new(manager),
        client,
        audio,
        storage,
    }
}

/// Poll until `predicate` holds for the manager.
pub async fn wait_until(manager: &ConversationManager, predicate: impl Fn(&ConversationManager) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !predicate(manager) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
}
