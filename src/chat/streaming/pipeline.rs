//! Streaming ingestion: send, regenerate and chunk consumption.
//!
//! Every write targets the conversation and message captured when the
//! request started, never the selected conversation, so switching
//! conversations mid-stream cannot misroute output.

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::chat::audio::AudioChunk;
use crate::chat::client::{ChatRequest, ClientBinding, ThreadingMetadata};
use crate::chat::core::conversation::Conversation;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, MessageId};
use crate::chat::core::message::{Message, Role};
use crate::chat::store::ConversationManager;
use crate::chat::store::manager::binding_for;
use crate::chat::store::quota;
use crate::chat::threads::{ThreadRoute, resolve_thread_route};

/// Appended when a stream completes without any text.
pub const NO_RESPONSE_NOTICE: &str = "No response received from server.";
/// Appended when configuring the client or reading the stream fails.
pub const ERROR_NOTICE: &str = "Sorry, there was an error processing your request.";

const DEFAULT_AUDIO_FORMAT: &str = "mp3";

/// A user message to send.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SendRequest {
    /// Message text.
    pub content: String,
    /// Attached files the server may read.
    pub file_ids: Vec<String>,
    /// Thread to send in.
    pub thread_id: Option<String>,
    /// Spoken language; falls back to the conversation's audio settings.
    pub language: Option<String>,
    /// Ask for audio; falls back to the conversation's audio settings.
    pub return_audio: Option<bool>,
    /// TTS voice; falls back to the conversation's audio settings.
    pub tts_voice: Option<String>,
}

impl SendRequest {
    /// Plain text message.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Attach files by id.
    #[must_use]
    pub fn with_files(mut self, file_ids: Vec<String>) -> Self {
        self.file_ids = file_ids;
        self
    }

    /// Send inside a thread.
    #[must_use]
    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Result of a send or regenerate call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// The response was consumed (or replaced by a notice) and finalized.
    Completed {
        /// Conversation the response was written to.
        conversation_id: ConversationId,
        /// Assistant message holding the response.
        message_id: MessageId,
    },
    /// Another request was in flight; nothing changed.
    Rejected,
}

/// Where a response goes and how it is requested.
struct StreamTarget {
    conversation_id: ConversationId,
    message_id: MessageId,
    binding: ClientBinding,
    request: ChatRequest,
}

fn chat_request(
    conversation: &Conversation,
    content: String,
    file_ids: Vec<String>,
    thread_id: Option<String>,
    overrides: (Option<String>, Option<bool>, Option<String>),
) -> ChatRequest {
    let audio = conversation.audio_settings.clone().unwrap_or_default();
    let (language, return_audio, tts_voice) = overrides;
    ChatRequest {
        message: content,
        file_ids,
        thread_id,
        language: language.or(audio.language),
        return_audio: return_audio.unwrap_or(audio.enabled),
        tts_voice: tts_voice.or(audio.voice),
    }
}

fn thread_binding(conversation: &Conversation, route: Option<&ThreadRoute>) -> ClientBinding {
    let mut binding = binding_for(conversation);
    if let Some(route) = route {
        binding.session_id.clone_from(&route.session_id);
    }
    binding
}

impl ConversationManager {
    /// Send a message in the selected conversation and stream the reply.
    ///
    /// A conversation is created when none is selected. Stream failures do
    /// not surface here; they become an assistant notice.
    ///
    /// # Errors
    /// `MissingCredential` without a usable credential, thread routing
    /// errors for an unknown thread or one without a session.
    pub async fn send_message(&self, request: SendRequest) -> ChatResult<SendOutcome> {
        if self.state.load().is_loading {
            info!("request already in flight; send rejected");
            return Ok(SendOutcome::Rejected);
        }

        let settings = self.credentials.settings();
        let (conversation, created) = match self.current_conversation() {
            Some(conversation) => (conversation, None),
            None => {
                let conversation = self.new_default_conversation(&settings).await;
                (conversation.clone(), Some(conversation))
            }
        };
        if !conversation.credential.is_usable_in(settings.mode) {
            return Err(ChatError::MissingCredential);
        }

        let route = request
            .thread_id
            .as_deref()
            .map(|thread_id| resolve_thread_route(&conversation, thread_id))
            .transpose()?;

        let attachments = conversation
            .attached_files
            .iter()
            .filter(|f| request.file_ids.contains(&f.file_id))
            .cloned()
            .collect();
        let mut user = Message::user(request.content.clone()).with_attachments(attachments);
        let mut placeholder = Message::assistant_placeholder();
        if let Some(route) = &route {
            user = user.in_thread(&route.thread_id, Some(route.parent_message_id.clone()));
            placeholder =
                placeholder.in_thread(&route.thread_id, Some(route.parent_message_id.clone()));
        }

        let conversation_id = conversation.id;
        let message_id = placeholder.id.clone();
        let quota_config = self.config.quota.clone();
        let seeded = self.update(move |state| {
            if state.is_loading {
                return Ok(false);
            }
            if let Some(created) = created {
                if state.conversation(&created.id).is_none() {
                    state.conversations.insert(0, created);
                    quota::enforce_conversation_cap(
                        &mut state.conversations,
                        quota_config.max_conversations,
                    );
                }
                state.current_conversation_id = Some(conversation_id);
            }

            let target = state
                .conversation_mut(&conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
            if target.is_streaming() {
                return Err(ChatError::ConversationBusy(conversation_id.to_string()));
            }
            target.messages.push(user);
            target.messages.push(placeholder);
            target.title_from_first_message();
            target.touch();

            let report = quota::apply_message_quotas(&mut state.conversations, &quota_config);
            if let Some(notice) = report.notice(&quota_config) {
                info!(
                    per_conversation = report.per_conversation_trimmed,
                    global = report.global_trimmed,
                    "message quota trimmed history"
                );
                state.error = Some(notice);
            }
            state.is_loading = true;
            Ok(true)
        })?;
        if !seeded {
            info!("request already in flight; send rejected");
            return Ok(SendOutcome::Rejected);
        }

        let target = StreamTarget {
            conversation_id,
            message_id: message_id.clone(),
            binding: thread_binding(&conversation, route.as_ref()),
            request: chat_request(
                &conversation,
                request.content,
                request.file_ids,
                request.thread_id,
                (request.language, request.return_audio, request.tts_voice),
            ),
        };
        self.run_stream(&target).await;

        Ok(SendOutcome::Completed {
            conversation_id,
            message_id,
        })
    }

    /// Replace an assistant message with a fresh response to the user
    /// message before it.
    ///
    /// Messages after the regenerated one are discarded.
    ///
    /// # Errors
    /// `MessageNotFound`, `InvalidRegeneration` when the target is not an
    /// assistant reply to a user message, `ConversationBusy`,
    /// `MissingCredential`, or thread routing errors.
    pub async fn regenerate_response(&self, message_id: &MessageId) -> ChatResult<SendOutcome> {
        if self.state.load().is_loading {
            info!("request already in flight; regenerate rejected");
            return Ok(SendOutcome::Rejected);
        }

        let snapshot = self.snapshot();
        let conversation = snapshot
            .current()
            .filter(|c| c.message(message_id).is_some())
            .or_else(|| {
                snapshot
                    .conversations
                    .iter()
                    .find(|c| c.message(message_id).is_some())
            })
            .cloned()
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;

        let user = regeneration_source(&conversation, message_id)?.clone();
        if conversation.is_streaming() {
            return Err(ChatError::ConversationBusy(conversation.id.to_string()));
        }
        let settings = self.credentials.settings();
        if !conversation.credential.is_usable_in(settings.mode) {
            return Err(ChatError::MissingCredential);
        }

        let route = user
            .thread_id
            .as_deref()
            .filter(|_| user.is_thread_message)
            .map(|thread_id| resolve_thread_route(&conversation, thread_id))
            .transpose()?;

        let mut placeholder = Message::assistant_placeholder();
        if let Some(route) = &route {
            placeholder =
                placeholder.in_thread(&route.thread_id, user.parent_message_id.clone());
        }
        let new_id = placeholder.id.clone();
        let conversation_id = conversation.id;

        let seeded = self.update(|state| {
            if state.is_loading {
                return Ok(false);
            }
            let target = state
                .conversation_mut(&conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
            if target.is_streaming() {
                return Err(ChatError::ConversationBusy(conversation_id.to_string()));
            }
            regeneration_source(target, message_id)?;
            let index = target
                .messages
                .iter()
                .position(|m| &m.id == message_id)
                .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
            target.messages.truncate(index);
            target.messages.push(placeholder);
            target.touch();
            state.is_loading = true;
            Ok(true)
        })?;
        if !seeded {
            info!("request already in flight; regenerate rejected");
            return Ok(SendOutcome::Rejected);
        }

        let file_ids = user
            .attachments
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|f| f.file_id.clone())
            .collect();
        let target = StreamTarget {
            conversation_id,
            message_id: new_id.clone(),
            binding: thread_binding(&conversation, route.as_ref()),
            request: chat_request(
                &conversation,
                user.content,
                file_ids,
                route.map(|r| r.thread_id),
                (None, None, None),
            ),
        };
        self.run_stream(&target).await;

        Ok(SendOutcome::Completed {
            conversation_id,
            message_id: new_id,
        })
    }

    /// Consume a response into `target`, then finalize it.
    async fn run_stream(&self, target: &StreamTarget) {
        if target.request.return_audio {
            self.audio.reset();
        }

        match self.consume(target).await {
            Ok(true) => {}
            Ok(false) => self.append_notice(target, NO_RESPONSE_NOTICE),
            Err(err) => {
                warn!(
                    conversation_id = %target.conversation_id,
                    error = %err,
                    "streaming failed"
                );
                self.append_notice(target, ERROR_NOTICE);
            }
        }

        self.finalize(target);
    }

    /// Returns whether any text reached the message.
    async fn consume(&self, target: &StreamTarget) -> ChatResult<bool> {
        self.client.configure(target.binding.clone()).await?;
        let mut stream = self.client.stream_chat(target.request.clone()).await?;

        let delay = self.config.streaming.chunk_delay();
        let mut received_text = false;
        let mut next_audio_index = 0_u32;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            if let Some(message) = chunk.error.as_deref() {
                warn!(
                    conversation_id = %target.conversation_id,
                    error = message,
                    "server reported an error"
                );
                self.append_text(target, message);
                received_text = true;
                break;
            }

            if let Some(delta) = chunk.response.as_deref() {
                let clean = self.sanitizer.strip_audio_payloads(delta);
                if !clean.is_empty() {
                    self.append_text(target, &clean);
                    received_text = true;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }

            if let Some(audio) = chunk.audio_chunk {
                let chunk_index = chunk.chunk_index.unwrap_or(next_audio_index);
                next_audio_index = chunk_index.saturating_add(1);
                self.audio.add_chunk(AudioChunk {
                    audio,
                    audio_format: chunk
                        .audio_format
                        .clone()
                        .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()),
                    chunk_index,
                });
            }

            if chunk.done {
                self.complete(target, chunk.audio, chunk.audio_format, chunk.threading);
                break;
            }
        }

        Ok(received_text)
    }

    /// Append to the target message if it is still the streaming tail.
    fn append_text(&self, target: &StreamTarget, delta: &str) {
        self.mutate(|state| {
            let Some(conversation) = state.conversation_mut(&target.conversation_id) else {
                debug!(conversation_id = %target.conversation_id, "append to missing conversation ignored");
                return;
            };
            match conversation.messages.last_mut() {
                Some(last) if last.id == target.message_id && last.is_streaming => {
                    self.sanitizer.bounded_append(&mut last.content, delta);
                    conversation.touch();
                }
                _ => debug!(message_id = %target.message_id, "append to non-streaming message ignored"),
            }
        });
    }

    fn append_notice(&self, target: &StreamTarget, notice: &str) {
        self.mutate(|state| {
            let Some(conversation) = state.conversation_mut(&target.conversation_id) else {
                return;
            };
            if let Some(message) = conversation
                .message_mut(&target.message_id)
                .filter(|m| m.is_streaming)
            {
                if !message.content.is_empty() {
                    message.content.push_str("\n\n");
                }
                message.content.push_str(notice);
                conversation.touch();
            }
        });
    }

    /// Record completion metadata.
    fn complete(
        &self,
        target: &StreamTarget,
        audio: Option<String>,
        audio_format: Option<String>,
        threading: Option<ThreadingMetadata>,
    ) {
        if audio.is_none() && threading.is_none() {
            return;
        }
        self.mutate(|state| {
            let Some(conversation) = state.conversation_mut(&target.conversation_id) else {
                return;
            };
            if let Some(audio) = audio {
                if let Some(last) = conversation
                    .messages
                    .iter_mut()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                {
                    last.audio = Some(audio);
                    last.audio_format =
                        Some(audio_format.unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()));
                }
            }
            if let Some(threading) = threading {
                if let Some(message) = conversation.message_mut(&target.message_id) {
                    if threading.supports_threading {
                        message.supports_threading = true;
                    }
                    if threading.message_id.is_some() {
                        message.database_message_id = threading.message_id;
                    }
                }
            }
            conversation.touch();
        });
    }

    /// Clear the streaming flag and recompute the loading flag.
    fn finalize(&self, target: &StreamTarget) {
        self.mutate(|state| {
            if let Some(message) = state
                .conversation_mut(&target.conversation_id)
                .and_then(|c| c.message_mut(&target.message_id))
            {
                message.is_streaming = false;
            } else {
                debug!(message_id = %target.message_id, "finalize of vanished message ignored");
            }
            state.sync_loading();
        });
        debug!(
            conversation_id = %target.conversation_id,
            message_id = %target.message_id,
            "response finalized"
        );
    }
}

/// The user message an assistant message answers.
fn regeneration_source<'a>(
    conversation: &'a Conversation,
    message_id: &MessageId,
) -> ChatResult<&'a Message> {
    let index = conversation
        .messages
        .iter()
        .position(|m| &m.id == message_id)
        .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
    let invalid = || ChatError::InvalidRegeneration(message_id.to_string());
    if conversation.messages[index].role != Role::Assistant || index == 0 {
        return Err(invalid());
    }
    let previous = &conversation.messages[index - 1];
    if previous.role != Role::User {
        return Err(invalid());
    }
    Ok(previous)
}
