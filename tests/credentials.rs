mod common;

use common::{config, harness};
use orbit_chat::chat::storage::{ADAPTER_NAME_KEY, API_KEY_KEY, API_URL_KEY};
use orbit_chat::chat::{
    ApiKeyStatus, ChatError, ConfigureRequest, Credential, CredentialMode, KeyValueStore,
    SendRequest,
};

#[tokio::test]
async fn test_invalid_key_leaves_state_untouched() {
    let h = harness(config()).await;
    h.client.set_key_status(ApiKeyStatus {
        exists: false,
        ..ApiKeyStatus::default()
    });
    let before = h.manager.snapshot();

    assert!(matches!(
        h.manager.configure(ConfigureRequest::api_key("nope")).await,
        Err(ChatError::InvalidApiKey)
    ));
    assert_eq!(h.manager.snapshot().revision, before.revision);
    assert_eq!(h.storage.get(API_KEY_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn test_inactive_key_rejected() {
    let h = harness(config()).await;
    h.client.set_key_status(ApiKeyStatus {
        exists: true,
        active: false,
        ..ApiKeyStatus::default()
    });

    assert!(matches!(
        h.manager.configure(ConfigureRequest::api_key("old")).await,
        Err(ChatError::InactiveApiKey)
    ));
}

#[tokio::test]
async fn test_configure_binds_and_persists_key() {
    let h = harness(config()).await;

    h.manager
        .configure(ConfigureRequest::api_key("user-key").with_api_url("http://orbit.test"))
        .await
        .unwrap();

    let conversation = h.manager.current_conversation().unwrap();
    assert_eq!(conversation.credential, Credential::ApiKey("user-key".to_string()));
    assert_eq!(conversation.api_url, "http://orbit.test");
    assert!(conversation.adapter_info.is_some());

    let bound = h.client.configured().last().cloned().unwrap();
    assert_eq!(bound.api_url, "http://orbit.test");
    assert_eq!(
        h.storage.get(API_KEY_KEY).await.unwrap().as_deref(),
        Some("user-key")
    );
    assert_eq!(
        h.storage.get(API_URL_KEY).await.unwrap().as_deref(),
        Some("http://orbit.test")
    );
}

#[tokio::test]
async fn test_adapter_mode_requires_adapter_name() {
    let mut config = config();
    config.credentials.mode = CredentialMode::Adapter;
    let h = harness(config).await;
    let id = h.manager.current_conversation().unwrap().id;
    assert_eq!(
        h.manager.current_conversation().unwrap().credential,
        Credential::Unset
    );

    assert!(matches!(
        h.manager.send_message(SendRequest::new("hi")).await,
        Err(ChatError::MissingCredential)
    ));
    assert!(h.manager.conversation(&id).unwrap().messages.is_empty());
    assert!(matches!(
        h.manager.configure(ConfigureRequest::api_key("k")).await,
        Err(ChatError::AdapterRequired)
    ));

    h.manager
        .configure(ConfigureRequest::adapter("support"))
        .await
        .unwrap();
    h.manager.send_message(SendRequest::new("hi")).await.unwrap();

    let streams = h.client.streams();
    assert_eq!(
        streams[0].binding.as_ref().unwrap().credential,
        Credential::AdapterName("support".to_string())
    );
    assert_eq!(
        h.storage.get(ADAPTER_NAME_KEY).await.unwrap().as_deref(),
        Some("support")
    );
}

#[tokio::test]
async fn test_mode_switch_rebinds_conversations() {
    let h = harness(config()).await;
    h.manager
        .configure(ConfigureRequest::api_key("user-key"))
        .await
        .unwrap();

    h.manager.set_mode(CredentialMode::Adapter).await;
    assert_eq!(h.manager.credentials().mode(), CredentialMode::Adapter);
    assert_eq!(
        h.manager.current_conversation().unwrap().credential,
        Credential::Unset
    );

    h.manager.set_mode(CredentialMode::DirectKey).await;
    assert_eq!(
        h.manager.current_conversation().unwrap().credential,
        Credential::ApiKey("user-key".to_string())
    );
}
