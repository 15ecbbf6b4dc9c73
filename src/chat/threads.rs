//! Threads: session-scoped branches rooted at a message.
//!
//! A thread does not get its own conversation. Its messages are appended to
//! the parent conversation, tagged with the thread id, and only the network
//! calls switch to the thread's session id.

use tracing::info;

use crate::chat::core::conversation::Conversation;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::MessageId;
use crate::chat::core::message::ThreadInfo;
use crate::chat::store::ConversationManager;
use crate::chat::store::manager::binding_for;

/// Session routing for a message sent inside a thread.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ThreadRoute {
    pub(crate) thread_id: String,
    pub(crate) session_id: String,
    pub(crate) parent_message_id: String,
}

/// Find the message owning `thread_id` and its thread session.
pub(crate) fn resolve_thread_route(
    conversation: &Conversation,
    thread_id: &str,
) -> ChatResult<ThreadRoute> {
    let (parent, info) = conversation
        .messages
        .iter()
        .find_map(|m| {
            m.thread_info
                .as_ref()
                .filter(|info| info.thread_id == thread_id)
                .map(|info| (m, info))
        })
        .ok_or_else(|| ChatError::MessageNotFound(format!("thread {thread_id}")))?;

    if info.thread_session_id.trim().is_empty() {
        return Err(ChatError::ThreadSessionMissing(thread_id.to_string()));
    }

    Ok(ThreadRoute {
        thread_id: thread_id.to_string(),
        session_id: info.thread_session_id.clone(),
        parent_message_id: parent.id.to_string(),
    })
}

impl ConversationManager {
    /// Open a thread rooted at `message_id` in the conversation whose session
    /// is `session_id`.
    ///
    /// # Errors
    /// `ConversationNotFound`, `MissingCredential`, `MessageNotFound`, or the
    /// client's error when the server refuses.
    pub async fn create_thread(
        &self,
        message_id: &MessageId,
        session_id: &str,
    ) -> ChatResult<ThreadInfo> {
        let settings = self.credentials.settings();
        let conversation = self
            .snapshot()
            .conversation_by_session(session_id)
            .cloned()
            .ok_or_else(|| ChatError::ConversationNotFound(session_id.to_string()))?;
        if !conversation.credential.is_usable_in(settings.mode) {
            return Err(ChatError::MissingCredential);
        }
        let server_id = conversation
            .message(message_id)
            .map(|m| m.server_id().to_string())
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;

        let info = self
            .client
            .create_thread(&binding_for(&conversation), &server_id, session_id)
            .await?;

        let conversation_id = conversation.id;
        let stored = info.clone();
        self.update(move |state| {
            let message = state
                .conversation_mut(&conversation_id)
                .and_then(|c| c.message_mut(message_id))
                .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
            message.thread_info = Some(stored);
            message.supports_threading = true;
            if let Some(conversation) = state.conversation_mut(&conversation_id) {
                conversation.touch();
            }
            Ok(())
        })?;

        info!(
            conversation_id = %conversation_id,
            thread_id = %info.thread_id,
            "thread created"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::conversation::Credential;
    use crate::chat::core::message::Message;

    fn conversation_with_thread(session: &str) -> Conversation {
        let mut conv = Conversation::new(Credential::ApiKey("k".to_string()), "http://x");
        let mut root = Message::assistant("root");
        root.thread_info = Some(ThreadInfo {
            thread_id: "t-1".to_string(),
            thread_session_id: session.to_string(),
            parent_message_id: None,
        });
        conv.messages.push(Message::user("q"));
        conv.messages.push(root);
        conv
    }

    #[test]
    fn test_route_uses_thread_session() {
        let conv = conversation_with_thread("thread-sess");
        let route = resolve_thread_route(&conv, "t-1").unwrap();
        assert_eq!(route.session_id, "thread-sess");
        assert_eq!(route.parent_message_id, conv.messages[1].id.to_string());
    }

    #[test]
    fn test_missing_thread_session_rejected() {
        let conv = conversation_with_thread("");
        assert!(matches!(
            resolve_thread_route(&conv, "t-1"),
            Err(ChatError::ThreadSessionMissing(_))
        ));
    }

    #[test]
    fn test_unknown_thread_rejected() {
        let conv = conversation_with_thread("s");
        assert!(matches!(
            resolve_thread_route(&conv, "nope"),
            Err(ChatError::MessageNotFound(_))
        ));
    }
}
