//! Conversation store: snapshot state, quotas and operations.

pub mod manager;
pub mod quota;
pub mod state;

pub use manager::{ChatCollaborators, ConversationManager, DeletionSummary};
pub use quota::QuotaReport;
pub use state::{ChatState, PersistedState};
