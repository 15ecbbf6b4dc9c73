//! Immutable snapshot of the conversation store.

use serde::{Deserialize, Serialize};

use crate::chat::core::conversation::Conversation;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::ConversationId;
use crate::chat::storage::MirrorSnapshot;

/// Complete store state; replaced wholesale on every mutation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatState {
    /// Conversations, most recently created first.
    pub conversations: Vec<Conversation>,
    /// Selected conversation.
    pub current_conversation_id: Option<ConversationId>,
    /// A request is in flight for the selected conversation.
    pub is_loading: bool,
    /// Transient user-visible notice.
    pub error: Option<String>,
    /// Bumped by every mutation.
    pub revision: u64,
}

impl ChatState {
    /// Selected conversation, if the id still resolves.
    #[must_use]
    pub fn current(&self) -> Option<&Conversation> {
        self.current_conversation_id
            .as_ref()
            .and_then(|id| self.conversation(id))
    }

    /// Conversation by id.
    #[must_use]
    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    /// Mutable conversation by id.
    pub fn conversation_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| &c.id == id)
    }

    /// Conversation whose main session id is `session_id`.
    #[must_use]
    pub fn conversation_by_session(&self, session_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| {
            c.session_id
                .as_ref()
                .is_some_and(|s| s.to_string() == session_id)
        })
    }

    /// Whether the selected conversation has a streaming message.
    #[must_use]
    pub fn current_is_streaming(&self) -> bool {
        self.current().is_some_and(Conversation::is_streaming)
    }

    /// Recompute `is_loading` from the selected conversation.
    pub fn sync_loading(&mut self) {
        self.is_loading = self.current_is_streaming();
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedStateRef<'a> {
    conversations: &'a [Conversation],
    current_conversation_id: Option<&'a ConversationId>,
}

/// Shape written under the state key.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    /// Conversations as persisted.
    pub conversations: Vec<Conversation>,
    /// Selected conversation as persisted.
    pub current_conversation_id: Option<ConversationId>,
}

impl MirrorSnapshot for ChatState {
    fn revision(&self) -> u64 {
        self.revision
    }

    fn to_payload(&self) -> ChatResult<String> {
        let persisted = PersistedStateRef {
            conversations: &self.conversations,
            current_conversation_id: self.current_conversation_id.as_ref(),
        };
        Ok(serde_json::to_string(&persisted)?)
    }
}
