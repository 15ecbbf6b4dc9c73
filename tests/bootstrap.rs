mod common;

use std::sync::Arc;

use common::{config, harness_with_storage};
use orbit_chat::chat::storage::{ADAPTER_NAME_KEY, SESSION_ID_KEY, STATE_KEY};
use orbit_chat::chat::{
    ChatConfig, Conversation, ConversationId, Credential, CredentialMode, InMemoryKeyValueStore,
    KeyValueStore, Message, QuotaConfig,
};
use serde_json::json;

fn conversation(title: &str, messages: Vec<Message>) -> Conversation {
    let mut conversation =
        Conversation::new(Credential::ApiKey("stored-key".to_string()), "http://orbit.test");
    conversation.title = title.to_string();
    conversation.messages = messages;
    conversation
}

async fn seeded_storage(conversations: &[Conversation]) -> Arc<InMemoryKeyValueStore> {
    let storage = Arc::new(InMemoryKeyValueStore::new());
    let payload = json!({
        "conversations": conversations,
        "currentConversationId": ConversationId::new(),
    });
    storage
        .set(STATE_KEY, payload.to_string())
        .await
        .unwrap();
    storage
}

#[tokio::test]
async fn test_rehydrate_repairs_and_reselects_by_session() {
    let interrupted = conversation(
        "interrupted",
        vec![Message::user("q"), Message::assistant_placeholder()],
    );
    let finished = conversation(
        "finished",
        vec![Message::user("q"), Message::assistant("a")],
    );
    let storage = seeded_storage(&[interrupted.clone(), finished.clone()]).await;
    let finished_session = finished.session_id.unwrap().to_string();
    storage
        .set(SESSION_ID_KEY, finished_session.clone())
        .await
        .unwrap();

    let h = harness_with_storage(config(), storage).await;

    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.current_conversation_id, Some(finished.id));
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.conversation(&interrupted.id).unwrap().messages.len(), 1);
    assert!(snapshot.conversations.iter().all(|c| !c.is_streaming()));
    assert_eq!(
        h.client.configured().last().unwrap().session_id,
        finished_session
    );

    h.manager.flush().await.unwrap();
    let persisted = h.storage.get(STATE_KEY).await.unwrap().unwrap();
    assert!(!persisted.contains("\"isStreaming\":true"));
    assert!(persisted.contains(&finished.id.to_string()));
}

#[tokio::test]
async fn test_corrupt_state_starts_fresh() {
    let storage = Arc::new(InMemoryKeyValueStore::new());
    storage
        .set(STATE_KEY, "{not json".to_string())
        .await
        .unwrap();

    let h = harness_with_storage(config(), storage).await;

    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.conversations.len(), 1);
    assert!(snapshot.current().unwrap().messages.is_empty());
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn test_conversation_cap_applied_on_load() {
    let stored: Vec<Conversation> = (0..3)
        .map(|i| conversation(&format!("c{i}"), vec![Message::user("q")]))
        .collect();
    let storage = seeded_storage(&stored).await;
    let mut config = config();
    config.quota = QuotaConfig {
        max_conversations: Some(2),
        ..QuotaConfig::unlimited()
    };

    let h = harness_with_storage(config, storage).await;

    let snapshot = h.manager.snapshot();
    let titles: Vec<&str> = snapshot
        .conversations
        .iter()
        .map(|c| c.title.as_str())
        .collect();
    assert_eq!(titles, vec!["c0", "c1"]);
    assert_eq!(snapshot.current_conversation_id, Some(stored[0].id));
}

#[tokio::test]
async fn test_credentials_normalised_to_active_mode() {
    let storage = seeded_storage(&[conversation("c", vec![Message::user("q")])]).await;
    storage
        .set(ADAPTER_NAME_KEY, "support".to_string())
        .await
        .unwrap();
    let mut config: ChatConfig = config();
    config.credentials.mode = CredentialMode::Adapter;

    let h = harness_with_storage(config, storage).await;

    assert_eq!(
        h.manager.current_conversation().unwrap().credential,
        Credential::AdapterName("support".to_string())
    );
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut config = config();
    config.quota.max_conversations = Some(0);
    let collaborators = orbit_chat::chat::ChatCollaborators {
        client: common::ScriptedClient::new(),
        audio: Arc::new(orbit_chat::chat::NoopAudioSink),
        storage: Arc::new(InMemoryKeyValueStore::new()),
    };

    assert!(
        orbit_chat::chat::ConversationManager::bootstrap(config, collaborators)
            .await
            .is_err()
    );
}
