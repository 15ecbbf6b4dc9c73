//! Startup: rehydrate persisted state, repair it and wire collaborators.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::chat::core::config::{ChatConfig, CredentialSettings};
use crate::chat::core::conversation::{Conversation, DEFAULT_TITLE};
use crate::chat::core::errors::ChatResult;
use crate::chat::credentials::{CredentialResolver, StoredCredentials};
use crate::chat::storage::{KeyValueStore, PersistenceMirror, SESSION_ID_KEY, STATE_KEY};
use crate::chat::store::quota;
use crate::chat::store::state::{ChatState, PersistedState};
use crate::chat::store::{ChatCollaborators, ConversationManager};
use crate::chat::streaming::sanitize::Sanitizer;

/// What [`repair_conversations`] changed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RepairReport {
    /// Conversations that got a fresh session id.
    pub sessions_assigned: usize,
    /// Conversations whose empty title was reset.
    pub titles_reset: usize,
    /// Conversations rebound to the active credential mode.
    pub credentials_rebound: usize,
    /// Messages dropped because they were persisted mid-stream.
    pub interrupted_messages: usize,
}

impl RepairReport {
    /// Whether nothing changed.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.sessions_assigned == 0
            && self.titles_reset == 0
            && self.credentials_rebound == 0
            && self.interrupted_messages == 0
    }
}

/// Bring persisted conversations back to a consistent shape.
pub fn repair_conversations(
    conversations: &mut [Conversation],
    settings: &CredentialSettings,
    stored: &StoredCredentials,
) -> RepairReport {
    let mut report = RepairReport::default();
    let fallback_url = stored
        .api_url
        .clone()
        .unwrap_or_else(|| settings.default_api_url.clone());

    for conversation in conversations {
        if conversation.session_id.is_none() {
            conversation.ensure_session_id();
            report.sessions_assigned += 1;
        }
        if conversation.title.trim().is_empty() {
            conversation.title = DEFAULT_TITLE.to_string();
            report.titles_reset += 1;
        }

        let credential =
            CredentialResolver::normalize(&conversation.credential, settings, stored);
        if credential != conversation.credential {
            conversation.credential = credential;
            conversation.adapter_info = None;
            report.credentials_rebound += 1;
        }
        if conversation.api_url.trim().is_empty() {
            conversation.api_url.clone_from(&fallback_url);
        }

        let before = conversation.messages.len();
        conversation.messages.retain(|m| !m.is_streaming);
        report.interrupted_messages += before - conversation.messages.len();
    }

    report
}

async fn load_persisted(storage: &dyn KeyValueStore) -> PersistedState {
    let payload = match storage.get(STATE_KEY).await {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            debug!("no persisted chat state");
            return PersistedState::default();
        }
        Err(err) => {
            warn!(error = %err, "failed to read persisted chat state");
            return PersistedState::default();
        }
    };

    match serde_json::from_str(&payload) {
        Ok(state) => state,
        Err(err) => {
            warn!(error = %err, "discarding corrupt chat state");
            PersistedState::default()
        }
    }
}

async fn stored_session_id(storage: &dyn KeyValueStore) -> Option<String> {
    match storage.get(SESSION_ID_KEY).await {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "failed to read stored session id");
            None
        }
    }
}

impl ConversationManager {
    /// Build a manager from persisted state.
    ///
    /// Persisted conversations are repaired, capped and re-selected; a
    /// default conversation is created when none survive. Binding the
    /// network client is best effort.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub async fn bootstrap(
        config: ChatConfig,
        collaborators: ChatCollaborators,
    ) -> ChatResult<Self> {
        config.validate()?;
        let sanitizer = Sanitizer::new(config.streaming.max_message_chars)?;
        let ChatCollaborators {
            client,
            audio,
            storage,
        } = collaborators;
        let credentials = CredentialResolver::new(config.credentials.clone(), Arc::clone(&storage));
        let settings = credentials.settings();
        let stored = credentials.stored().await;

        let PersistedState {
            mut conversations,
            current_conversation_id,
        } = load_persisted(storage.as_ref()).await;

        let report = repair_conversations(&mut conversations, &settings, &stored);
        if !report.is_clean() {
            info!(?report, "repaired persisted conversations");
        }
        let dropped =
            quota::enforce_conversation_cap(&mut conversations, config.quota.max_conversations);
        if dropped > 0 {
            info!(dropped, "conversation cap applied on load");
        }

        let session = stored_session_id(storage.as_ref()).await;
        let mut current = current_conversation_id
            .filter(|id| conversations.iter().any(|c| &c.id == id))
            .or_else(|| {
                let session = session.as_deref()?;
                conversations
                    .iter()
                    .find(|c| c.session_id.is_some_and(|s| s.to_string() == session))
                    .map(|c| c.id)
            })
            .or_else(|| conversations.first().map(|c| c.id));

        if current.is_none() {
            let credential = credentials.default_credential(&settings).await;
            let api_url = stored
                .api_url
                .clone()
                .unwrap_or_else(|| settings.default_api_url.clone());
            let conversation = Conversation::new(credential, api_url);
            current = Some(conversation.id);
            conversations.push(conversation);
        }

        let state = ChatState {
            conversations,
            current_conversation_id: current,
            is_loading: false,
            error: None,
            revision: 1,
        };
        let state = Arc::new(ArcSwap::from_pointee(state));
        let mirror = PersistenceMirror::spawn(Arc::clone(&state), Arc::clone(&storage), 0);
        mirror.notify();

        let manager = Self {
            state,
            writer: Mutex::new(()),
            config,
            credentials,
            client,
            audio,
            storage,
            mirror,
            sanitizer,
        };

        let selected = manager.current_conversation();
        info!(
            conversations = manager.snapshot().conversations.len(),
            current = ?selected.as_ref().map(|c| c.id),
            mode = ?settings.mode,
            "chat state loaded"
        );
        if let Some(conversation) = selected {
            manager.bind_client(&conversation).await;
            manager.persist_session_id(conversation.session_id).await;
        }
        Ok(manager)
    }
}
