//! Conversation store operations.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::chat::audio::AudioSink;
use crate::chat::client::{ChatClient, ClientBinding};
use crate::chat::core::config::{ChatConfig, CredentialMode, CredentialSettings};
use crate::chat::core::conversation::{AudioSettings, Conversation};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, SessionId};
use crate::chat::core::message::FileAttachment;
use crate::chat::credentials::{ConfigureRequest, CredentialResolver};
use crate::chat::storage::{KeyValueStore, PersistenceMirror, SESSION_ID_KEY};
use crate::chat::store::quota;
use crate::chat::store::state::ChatState;
use crate::chat::streaming::sanitize::Sanitizer;

/// External collaborators of the manager.
#[derive(Clone)]
pub struct ChatCollaborators {
    /// Network client.
    pub client: Arc<dyn ChatClient>,
    /// Audio player.
    pub audio: Arc<dyn AudioSink>,
    /// Persisted key-value storage.
    pub storage: Arc<dyn KeyValueStore>,
}

/// Result of [`ConversationManager::delete_all_conversations`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeletionSummary {
    /// Conversations a remote deletion was attempted for.
    pub attempted: usize,
    /// Messages removed server-side.
    pub deleted_messages: u64,
    /// Files removed server-side.
    pub deleted_files: u64,
    /// Failures as `conversation_id: reason`, file failures included.
    pub failures: Vec<String>,
}

/// Owns the conversation list, the selected conversation and the
/// request-in-flight flag.
///
/// State lives in a single [`ChatState`] snapshot. Every mutation clones the
/// snapshot, edits the copy and swaps it in, so readers never observe a
/// partial update. Network side work runs after the swap and never fails the
/// operation unless noted.
pub struct ConversationManager {
    pub(crate) state: Arc<ArcSwap<ChatState>>,
    pub(crate) writer: Mutex<()>,
    pub(crate) config: ChatConfig,
    pub(crate) credentials: CredentialResolver,
    pub(crate) client: Arc<dyn ChatClient>,
    pub(crate) audio: Arc<dyn AudioSink>,
    pub(crate) storage: Arc<dyn KeyValueStore>,
    pub(crate) mirror: PersistenceMirror,
    pub(crate) sanitizer: Sanitizer,
}

/// Binding for requests made on behalf of `conversation`.
pub(crate) fn binding_for(conversation: &Conversation) -> ClientBinding {
    ClientBinding {
        api_url: conversation.api_url.clone(),
        credential: conversation.credential.clone(),
        session_id: conversation
            .session_id
            .map(|s| s.to_string())
            .unwrap_or_default(),
    }
}

impl ConversationManager {
    // ---- snapshot access ------------------------------------------------

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ChatState> {
        self.state.load_full()
    }

    /// Selected conversation.
    #[must_use]
    pub fn current_conversation(&self) -> Option<Conversation> {
        self.state.load().current().cloned()
    }

    /// Conversation by id.
    #[must_use]
    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.state.load().conversation(id).cloned()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Credential resolver.
    #[must_use]
    pub const fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    /// Apply a copy-on-write transition and schedule persistence.
    ///
    /// The closure sees a private copy; returning `Err` discards it.
    pub(crate) fn update<R>(
        &self,
        f: impl FnOnce(&mut ChatState) -> ChatResult<R>,
    ) -> ChatResult<R> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state.load_full();
        let mut next = ChatState::clone(&current);
        let out = f(&mut next)?;
        self.commit(&current, next);
        Ok(out)
    }

    /// Infallible variant of [`Self::update`].
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state.load_full();
        let mut next = ChatState::clone(&current);
        let out = f(&mut next);
        self.commit(&current, next);
        out
    }

    fn commit(&self, current: &ChatState, mut next: ChatState) {
        next.revision = current.revision + 1;
        self.state.store(Arc::new(next));
        self.mirror.notify();
    }

    /// Wait until the current snapshot has been written to storage.
    ///
    /// # Errors
    /// Returns an error if the persistence worker has stopped.
    pub async fn flush(&self) -> ChatResult<()> {
        let revision = self.state.load().revision;
        self.mirror.flush(revision).await
    }

    /// Persist the latest snapshot and stop the persistence worker.
    pub async fn shutdown(&self) {
        self.mirror.shutdown().await;
    }

    // ---- side work ------------------------------------------------------

    pub(crate) async fn new_default_conversation(
        &self,
        settings: &CredentialSettings,
    ) -> Conversation {
        let credential = self.credentials.default_credential(settings).await;
        Conversation::new(credential, settings.default_api_url.clone())
    }

    pub(crate) async fn persist_session_id(&self, session_id: Option<SessionId>) {
        let Some(session_id) = session_id else {
            return;
        };
        if let Err(err) = self
            .storage
            .set(SESSION_ID_KEY, session_id.to_string())
            .await
        {
            warn!(error = %err, "failed to persist session id");
        }
    }

    /// Point the network client at `conversation`; failures are logged.
    pub(crate) async fn bind_client(&self, conversation: &Conversation) {
        if let Err(err) = self.client.configure(binding_for(conversation)).await {
            warn!(conversation_id = %conversation.id, error = %err, "failed to configure client");
        }
    }

    /// Fetch and cache adapter metadata if missing; failures are logged.
    pub(crate) async fn refresh_adapter_info(&self, id: ConversationId) {
        let Some(conversation) = self.conversation(&id) else {
            return;
        };
        if conversation.adapter_info.is_some() || conversation.credential.is_unset() {
            return;
        }

        match self.client.adapter_info(&binding_for(&conversation)).await {
            Ok(info) => self.mutate(|state| {
                if let Some(conv) = state.conversation_mut(&id) {
                    if conv.adapter_info.is_none() {
                        conv.adapter_info = Some(info);
                    }
                }
            }),
            Err(err) => {
                warn!(conversation_id = %id, error = %err, "failed to fetch adapter info");
            }
        }
    }

    /// Make `conversation` the active one for the client and storage.
    async fn activate(&self, conversation: &Conversation) {
        self.persist_session_id(conversation.session_id).await;
        self.bind_client(conversation).await;
        self.refresh_adapter_info(conversation.id).await;
    }

    // ---- operations -----------------------------------------------------

    /// Create and select a new conversation.
    ///
    /// # Errors
    /// `ConversationLimitReached` when the conversation cap is reached, or
    /// `CurrentConversationEmpty` when the selected conversation has no
    /// messages. Nothing is mutated in either case.
    pub async fn create_conversation(&self) -> ChatResult<ConversationId> {
        let settings = self.credentials.settings();
        let max_conversations = self.config.quota.max_conversations;

        let check = |state: &ChatState| -> ChatResult<()> {
            if let Some(cap) = max_conversations {
                if state.conversations.len() >= cap {
                    return Err(ChatError::ConversationLimitReached(cap));
                }
            }
            if state.current().is_some_and(|c| c.messages.is_empty()) {
                return Err(ChatError::CurrentConversationEmpty);
            }
            Ok(())
        };
        check(&self.state.load())?;

        let conversation = self.new_default_conversation(&settings).await;
        let created = conversation.clone();
        self.update(move |state| {
            check(state)?;
            state.conversations.insert(0, conversation);
            quota::enforce_conversation_cap(&mut state.conversations, max_conversations);
            state.current_conversation_id = Some(created.id);
            state.is_loading = false;
            Ok(())
        })?;

        info!(conversation_id = %created.id, "conversation created");
        self.activate(&created).await;
        Ok(created.id)
    }

    /// Select a conversation.
    ///
    /// # Errors
    /// `ConversationNotFound` if `id` is unknown.
    pub async fn select_conversation(&self, id: ConversationId) -> ChatResult<()> {
        let selected = self.update(|state| {
            let conversation = state
                .conversation(&id)
                .cloned()
                .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
            state.current_conversation_id = Some(id);
            state.is_loading = conversation.is_streaming();
            Ok(conversation)
        })?;

        debug!(conversation_id = %id, "conversation selected");
        self.persist_session_id(selected.session_id).await;
        self.refresh_adapter_info(id).await;
        Ok(())
    }

    /// Delete a conversation locally after a best-effort remote cleanup.
    ///
    /// # Errors
    /// `ConversationNotFound` if `id` is unknown.
    pub async fn delete_conversation(&self, id: ConversationId) -> ChatResult<()> {
        let snapshot = self.snapshot();
        let conversation = snapshot
            .conversation(&id)
            .cloned()
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;

        if snapshot.current_conversation_id == Some(id) {
            self.audio.stop();
        }

        self.delete_remote(&conversation).await;

        let settings = self.credentials.settings();
        let replacement = self.new_default_conversation(&settings).await;
        let activated = self.update(move |state| {
            state.conversations.retain(|c| c.id != id);
            let mut activated = None;
            if state.conversations.is_empty() {
                state.current_conversation_id = Some(replacement.id);
                activated = Some(replacement.clone());
                state.conversations.push(replacement);
            } else if state.current().is_none() {
                state.current_conversation_id = state.conversations.first().map(|c| c.id);
                activated = state.current().cloned();
            }
            state.sync_loading();
            Ok(activated)
        })?;

        info!(conversation_id = %id, "conversation deleted");
        if let Some(conversation) = activated {
            self.activate(&conversation).await;
        }
        Ok(())
    }

    async fn delete_remote(&self, conversation: &Conversation) {
        if conversation.credential.is_unset() {
            return;
        }
        match self
            .client
            .delete_conversation_with_files(&binding_for(conversation), conversation.file_ids())
            .await
        {
            Ok(report) => {
                debug!(
                    conversation_id = %conversation.id,
                    deleted_messages = report.deleted_messages,
                    deleted_files = report.deleted_files,
                    "remote conversation deleted"
                );
                for failure in &report.file_errors {
                    warn!(conversation_id = %conversation.id, failure, "file deletion failed");
                }
            }
            Err(err) => {
                warn!(conversation_id = %conversation.id, error = %err, "remote deletion failed");
            }
        }
    }

    /// Delete every conversation and start over with one default
    /// conversation. Remote cleanups run concurrently and never fail the call.
    ///
    /// # Errors
    /// Only if the local reset fails.
    pub async fn delete_all_conversations(&self) -> ChatResult<DeletionSummary> {
        self.audio.stop();
        let conversations = self.snapshot().conversations.clone();
        let targets: Vec<&Conversation> = conversations
            .iter()
            .filter(|c| !c.credential.is_unset())
            .collect();

        let results = join_all(targets.iter().map(|conversation| async move {
            let result = self
                .client
                .delete_conversation_with_files(&binding_for(conversation), conversation.file_ids())
                .await;
            (conversation.id, result)
        }))
        .await;

        let mut summary = DeletionSummary {
            attempted: results.len(),
            ..DeletionSummary::default()
        };
        for (id, result) in results {
            match result {
                Ok(report) => {
                    summary.deleted_messages += report.deleted_messages;
                    summary.deleted_files += report.deleted_files;
                    summary
                        .failures
                        .extend(report.file_errors.into_iter().map(|e| format!("{id}: {e}")));
                }
                Err(err) => summary.failures.push(format!("{id}: {err}")),
            }
        }
        if !summary.failures.is_empty() {
            warn!(failures = ?summary.failures, "some remote deletions failed");
        }

        let settings = self.credentials.settings();
        let replacement = self.new_default_conversation(&settings).await;
        let activated = replacement.clone();
        self.update(move |state| {
            state.current_conversation_id = Some(replacement.id);
            state.conversations = vec![replacement];
            state.is_loading = false;
            state.error = None;
            Ok(())
        })?;

        info!(attempted = summary.attempted, "all conversations deleted");
        self.activate(&activated).await;
        Ok(summary)
    }

    /// Rename a conversation.
    ///
    /// # Errors
    /// `ConversationNotFound` if `id` is unknown.
    pub fn update_conversation_title(
        &self,
        id: ConversationId,
        title: impl Into<String>,
    ) -> ChatResult<()> {
        let title = title.into();
        self.update(|state| {
            let conversation = state
                .conversation_mut(&id)
                .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
            conversation.title = title;
            conversation.touch();
            Ok(())
        })
    }

    /// Empty a conversation's history, locally and (best effort) remotely.
    ///
    /// # Errors
    /// `ConversationNotFound` if `id` is unknown, `ConversationBusy` while it
    /// streams.
    pub async fn clear_conversation(&self, id: ConversationId) -> ChatResult<()> {
        let conversation = self
            .conversation(&id)
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
        if conversation.is_streaming() {
            return Err(ChatError::ConversationBusy(id.to_string()));
        }

        if !conversation.credential.is_unset() {
            if let Err(err) = self
                .client
                .clear_conversation(&binding_for(&conversation))
                .await
            {
                warn!(conversation_id = %id, error = %err, "remote history clear failed");
            }
        }

        self.update(|state| {
            let conversation = state
                .conversation_mut(&id)
                .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
            if conversation.is_streaming() {
                return Err(ChatError::ConversationBusy(id.to_string()));
            }
            conversation.messages.clear();
            conversation.touch();
            state.sync_loading();
            Ok(())
        })
    }

    fn edit_conversation<R>(
        &self,
        id: ConversationId,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> ChatResult<R> {
        self.update(|state| {
            let conversation = state
                .conversation_mut(&id)
                .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
            let out = f(conversation);
            conversation.touch();
            Ok(out)
        })
    }

    /// Attach a file; a record with the same `file_id` is replaced.
    ///
    /// # Errors
    /// `ConversationNotFound` if `id` is unknown.
    pub fn attach_file(&self, id: ConversationId, file: FileAttachment) -> ChatResult<()> {
        self.edit_conversation(id, |conversation| conversation.attach_file(file))
    }

    /// Detach a file; returns whether it was attached.
    ///
    /// # Errors
    /// `ConversationNotFound` if `id` is unknown.
    pub fn detach_file(&self, id: ConversationId, file_id: &str) -> ChatResult<bool> {
        self.edit_conversation(id, |conversation| {
            let before = conversation.attached_files.len();
            conversation.attached_files.retain(|f| f.file_id != file_id);
            conversation.attached_files.len() != before
        })
    }

    /// Set or clear the per-conversation audio override.
    ///
    /// # Errors
    /// `ConversationNotFound` if `id` is unknown.
    pub fn set_audio_settings(
        &self,
        id: ConversationId,
        settings: Option<AudioSettings>,
    ) -> ChatResult<()> {
        self.edit_conversation(id, |conversation| conversation.audio_settings = settings)
    }

    /// Dismiss the transient notice.
    pub fn clear_error(&self) {
        if self.state.load().error.is_none() {
            return;
        }
        self.mutate(|state| state.error = None);
    }

    /// Configure the credential of the selected conversation, creating one
    /// if none is selected.
    ///
    /// # Errors
    /// The resolver's validation errors, verbatim, and client binding
    /// failures. Nothing is mutated on error.
    pub async fn configure(&self, request: ConfigureRequest) -> ChatResult<()> {
        let settings = self.credentials.settings();
        let current = self.current_conversation();
        let resolved = self
            .credentials
            .resolve(
                &request,
                current.as_ref().map(|c| &c.credential),
                &settings,
                self.client.as_ref(),
            )
            .await?;

        let mut target = match current {
            Some(conversation) => conversation,
            None => self.new_default_conversation(&settings).await,
        };
        let is_new = self.conversation(&target.id).is_none();
        if target.credential != resolved.credential || target.api_url != resolved.api_url {
            target.adapter_info = None;
        }
        target.credential = resolved.credential.clone();
        target.api_url = resolved.api_url.clone();
        if let Some(session) = request.session_id.as_deref() {
            match session.parse::<SessionId>() {
                Ok(session) => target.session_id = Some(session),
                Err(_) => warn!(session, "ignoring malformed session id"),
            }
        }
        target.ensure_session_id();

        self.client.configure(binding_for(&target)).await?;

        let max_conversations = self.config.quota.max_conversations;
        let committed = target.clone();
        let target_id = target.id;
        self.update(move |state| {
            if is_new {
                state.conversations.insert(0, target);
                quota::enforce_conversation_cap(&mut state.conversations, max_conversations);
            } else if let Some(conversation) = state.conversation_mut(&target_id) {
                conversation.credential = target.credential;
                conversation.api_url = target.api_url;
                conversation.session_id = target.session_id;
                conversation.adapter_info = target.adapter_info;
                conversation.touch();
            } else {
                return Err(ChatError::ConversationNotFound(target_id.to_string()));
            }
            state.current_conversation_id = Some(target_id);
            state.sync_loading();
            Ok(())
        })?;

        info!(conversation_id = %committed.id, "credentials configured");
        self.credentials.persist(&resolved, &settings).await;
        self.persist_session_id(committed.session_id).await;
        self.refresh_adapter_info(committed.id).await;
        Ok(())
    }

    /// Switch credential mode and rebind every conversation to it.
    pub async fn set_mode(&self, mode: CredentialMode) {
        let settings = self.credentials.set_mode(mode);
        let stored = self.credentials.stored().await;

        let current = self.mutate(|state| {
            for conversation in &mut state.conversations {
                let credential =
                    CredentialResolver::normalize(&conversation.credential, &settings, &stored);
                if credential != conversation.credential {
                    conversation.credential = credential;
                    conversation.adapter_info = None;
                }
            }
            state.current().cloned()
        });

        info!(?mode, "credential mode changed");
        if let Some(current) = current {
            self.bind_client(&current).await;
            self.refresh_adapter_info(current.id).await;
        }
    }
}
