//! `reqwest` client for the ORBIT chat server.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::chat::client::wire::decode_stream;
use crate::chat::client::{
    ApiKeyStatus, ChatClient, ChatRequest, ClientBinding, ClientFuture, DeletionReport,
    ResponseStream,
};
use crate::chat::core::conversation::{AdapterInfo, Credential};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::message::ThreadInfo;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_MAX_CHARS: usize = 512;

// Lowercase so they can be used as static header names.
const API_KEY_HEADER: &str = "x-api-key";
const SESSION_HEADER: &str = "x-session-id";
const ADAPTER_HEADER: &str = "x-adapter-name";

/// HTTP implementation of [`ChatClient`].
///
/// Holds the binding used by [`ChatClient::stream_chat`]; every other call
/// takes an explicit binding so background cleanup never disturbs it.
pub struct HttpChatClient {
    client: Client,
    binding: ArcSwapOption<ClientBinding>,
}

impl HttpChatClient {
    /// Build a client with default transport settings.
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> ChatResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            binding: ArcSwapOption::empty(),
        }
    }

    /// Binding currently used for streamed requests.
    #[must_use]
    pub fn binding(&self) -> Option<Arc<ClientBinding>> {
        self.binding.load_full()
    }
}

fn endpoint(api_url: &str, path: &str) -> ChatResult<Url> {
    let base = api_url.trim_end_matches('/');
    Ok(Url::parse(&format!("{base}/{path}"))?)
}

fn credential_headers(binding: &ClientBinding) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut insert = |name: &'static str, value: &str| match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(err) => warn!(header = name, error = %err, "skipping invalid header value"),
    };

    match &binding.credential {
        Credential::ApiKey(key) => insert(API_KEY_HEADER, key),
        Credential::AdapterName(name) => insert(ADAPTER_HEADER, name),
        Credential::Unset => {}
    }
    if !binding.session_id.is_empty() {
        insert(SESSION_HEADER, &binding.session_id);
    }
    headers
}

fn bound(request: RequestBuilder, binding: &ClientBinding) -> RequestBuilder {
    request.headers(credential_headers(binding))
}

/// Turn a non-success response into [`ChatError::Http`].
async fn check(response: Response) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(ERROR_BODY_MAX_CHARS).collect();
    Err(ChatError::Http {
        status: status.as_u16(),
        body,
    })
}

fn chat_body(request: &ChatRequest) -> Value {
    let mut arguments = json!({
        "messages": [{ "role": "user", "content": request.message }],
        "stream": true,
    });
    if let Some(args) = arguments.as_object_mut() {
        if !request.file_ids.is_empty() {
            args.insert("file_ids".to_string(), json!(request.file_ids));
        }
        if let Some(thread_id) = &request.thread_id {
            args.insert("thread_id".to_string(), json!(thread_id));
        }
        if let Some(language) = &request.language {
            args.insert("language".to_string(), json!(language));
        }
        if request.return_audio {
            args.insert("return_audio".to_string(), json!(true));
        }
        if let Some(voice) = &request.tts_voice {
            args.insert("tts_voice".to_string(), json!(voice));
        }
    }

    json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": { "name": "chat", "arguments": arguments },
        "id": uuid::Uuid::new_v4().to_string(),
    })
}

impl HttpChatClient {
    async fn delete_history(&self, binding: &ClientBinding) -> ChatResult<u64> {
        let url = endpoint(
            &binding.api_url,
            &format!(
                "admin/chat-history/{}",
                urlencoding::encode(&binding.session_id)
            ),
        )?;
        let response = check(bound(self.client.delete(url), binding).send().await?).await?;
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok(body
            .get("deleted_count")
            .and_then(Value::as_u64)
            .unwrap_or_default())
    }

    async fn delete_file(&self, binding: &ClientBinding, file_id: &str) -> ChatResult<()> {
        let url = endpoint(
            &binding.api_url,
            &format!("api/files/{}", urlencoding::encode(file_id)),
        )?;
        check(bound(self.client.delete(url), binding).send().await?).await?;
        Ok(())
    }
}

impl ChatClient for HttpChatClient {
    fn configure(&self, binding: ClientBinding) -> ClientFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            endpoint(&binding.api_url, "v1/chat")?;
            debug!(session_id = %binding.session_id, "client binding updated");
            self.binding.store(Some(Arc::new(binding)));
            Ok(())
        })
    }

    fn validate_api_key(
        &self,
        api_url: &str,
        api_key: &str,
    ) -> ClientFuture<'_, ChatResult<ApiKeyStatus>> {
        let api_url = api_url.to_string();
        let api_key = api_key.to_string();
        Box::pin(async move {
            let url = endpoint(
                &api_url,
                &format!("admin/api-keys/{}/status", urlencoding::encode(&api_key)),
            )?;
            let response = self
                .client
                .get(url)
                .header(API_KEY_HEADER, api_key.as_str())
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(ApiKeyStatus::default());
            }
            Ok(check(response).await?.json().await?)
        })
    }

    fn adapter_info(&self, binding: &ClientBinding) -> ClientFuture<'_, ChatResult<AdapterInfo>> {
        let binding = binding.clone();
        Box::pin(async move {
            let url = endpoint(&binding.api_url, "admin/adapters/info")?;
            let response = check(bound(self.client.get(url), &binding).send().await?).await?;
            Ok(response.json().await?)
        })
    }

    fn stream_chat(&self, request: ChatRequest) -> ClientFuture<'_, ChatResult<ResponseStream>> {
        Box::pin(async move {
            let binding = self.binding.load_full().ok_or(ChatError::MissingCredential)?;
            let url = endpoint(&binding.api_url, "v1/chat")?;
            let response = bound(self.client.post(url), &binding)
                .header(ACCEPT, "text/event-stream")
                .json(&chat_body(&request))
                .send()
                .await?;
            let response = check(response).await?;
            Ok(decode_stream(response.bytes_stream()))
        })
    }

    fn delete_conversation_with_files(
        &self,
        binding: &ClientBinding,
        file_ids: Vec<String>,
    ) -> ClientFuture<'_, ChatResult<DeletionReport>> {
        let binding = binding.clone();
        Box::pin(async move {
            let deleted_messages = self.delete_history(&binding).await?;
            let mut report = DeletionReport {
                deleted_messages,
                ..DeletionReport::default()
            };
            for file_id in file_ids {
                match self.delete_file(&binding, &file_id).await {
                    Ok(()) => report.deleted_files += 1,
                    Err(err) => report.file_errors.push(format!("{file_id}: {err}")),
                }
            }
            Ok(report)
        })
    }

    fn clear_conversation(&self, binding: &ClientBinding) -> ClientFuture<'_, ChatResult<()>> {
        let binding = binding.clone();
        Box::pin(async move {
            self.delete_history(&binding).await?;
            Ok(())
        })
    }

    fn create_thread(
        &self,
        binding: &ClientBinding,
        message_id: &str,
        session_id: &str,
    ) -> ClientFuture<'_, ChatResult<ThreadInfo>> {
        let binding = binding.clone();
        let body = json!({ "message_id": message_id, "session_id": session_id });
        let message_id = message_id.to_string();
        Box::pin(async move {
            let url = endpoint(&binding.api_url, "api/threads")?;
            let response = check(
                bound(self.client.post(url), &binding)
                    .json(&body)
                    .send()
                    .await?,
            )
            .await?;
            let mut info: ThreadInfo = response.json().await?;
            if info.parent_message_id.is_none() {
                info.parent_message_id = Some(message_id);
            }
            Ok(info)
        })
    }
}
