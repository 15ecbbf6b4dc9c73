//! Retention limits applied inside store mutations.
//!
//! Only finalized messages count and only finalized messages are evicted;
//! a streaming message is never touched.

use crate::chat::core::config::QuotaConfig;
use crate::chat::core::conversation::Conversation;

/// What a quota pass removed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QuotaReport {
    /// Messages removed by the per-conversation cap.
    pub per_conversation_trimmed: usize,
    /// Messages removed by the global cap.
    pub global_trimmed: usize,
}

impl QuotaReport {
    /// Nothing was removed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.per_conversation_trimmed == 0 && self.global_trimmed == 0
    }

    /// User-visible notice naming the limits that fired.
    #[must_use]
    pub fn notice(&self, quota: &QuotaConfig) -> Option<String> {
        let mut limits = Vec::new();
        if self.per_conversation_trimmed > 0 {
            if let Some(cap) = quota.max_messages_per_conversation {
                limits.push(format!("{cap} messages per conversation"));
            }
        }
        if self.global_trimmed > 0 {
            if let Some(cap) = quota.max_total_messages {
                limits.push(format!("{cap} messages in total"));
            }
        }
        if limits.is_empty() {
            return None;
        }
        Some(format!(
            "Message limit reached ({}). Older messages were removed.",
            limits.join(", ")
        ))
    }
}

/// Remove the `count` oldest finalized messages of a conversation.
fn drop_oldest_finalized(conversation: &mut Conversation, count: usize) -> usize {
    let mut remaining = count;
    conversation.messages.retain(|message| {
        if remaining > 0 && message.is_finalized() {
            remaining -= 1;
            false
        } else {
            true
        }
    });
    count - remaining
}

/// Apply the per-conversation cap to one conversation.
///
/// At or over `cap` finalized messages, keeps the most recent
/// `max(cap - 1, 1)` finalized messages plus any streaming message.
pub fn trim_conversation(conversation: &mut Conversation, cap: usize) -> usize {
    let finalized = conversation.finalized_count();
    if finalized < cap {
        return 0;
    }
    let keep = cap.saturating_sub(1).max(1);
    drop_oldest_finalized(conversation, finalized.saturating_sub(keep))
}

/// Apply the per-conversation cap to every conversation.
pub fn enforce_per_conversation(conversations: &mut [Conversation], cap: Option<usize>) -> usize {
    let Some(cap) = cap else {
        return 0;
    };
    conversations
        .iter_mut()
        .map(|conversation| trim_conversation(conversation, cap))
        .sum()
}

/// Apply the global cap, evicting from the least recently updated
/// conversations first.
pub fn enforce_global(conversations: &mut [Conversation], cap: Option<usize>) -> usize {
    let Some(cap) = cap else {
        return 0;
    };
    let total: usize = conversations
        .iter()
        .map(Conversation::finalized_count)
        .sum();
    if total <= cap {
        return 0;
    }

    let mut order: Vec<usize> = (0..conversations.len()).collect();
    order.sort_by_key(|&index| conversations[index].updated_at);

    let mut overflow = total - cap;
    let mut removed = 0;
    for index in order {
        if overflow == 0 {
            break;
        }
        let dropped = drop_oldest_finalized(&mut conversations[index], overflow);
        overflow -= dropped;
        removed += dropped;
    }
    removed
}

/// Keep only the `cap` first (most recent) conversations.
pub fn enforce_conversation_cap(conversations: &mut Vec<Conversation>, cap: Option<usize>) -> usize {
    match cap {
        Some(cap) if conversations.len() > cap => {
            let dropped = conversations.len() - cap;
            conversations.truncate(cap);
            dropped
        }
        _ => 0,
    }
}

/// Per-conversation cap followed by the global cap.
pub fn apply_message_quotas(conversations: &mut [Conversation], quota: &QuotaConfig) -> QuotaReport {
    let per_conversation_trimmed =
        enforce_per_conversation(conversations, quota.max_messages_per_conversation);
    let global_trimmed = enforce_global(conversations, quota.max_total_messages);
    QuotaReport {
        per_conversation_trimmed,
        global_trimmed,
    }
}
