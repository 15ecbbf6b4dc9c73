mod common;

use common::{config, harness};
use orbit_chat::chat::{ChatError, ResponseChunk, SendOutcome, SendRequest, ThreadingMetadata};

fn done_with_threading(server_id: &str) -> ResponseChunk {
    ResponseChunk {
        done: true,
        threading: Some(ThreadingMetadata {
            supports_threading: true,
            message_id: Some(server_id.to_string()),
            session_id: None,
        }),
        ..ResponseChunk::default()
    }
}

#[tokio::test]
async fn test_thread_messages_use_thread_session() {
    let h = harness(config()).await;
    let conversation = h.manager.current_conversation().unwrap();
    let session = conversation.session_id.unwrap().to_string();

    h.client
        .push_chunks(vec![ResponseChunk::text("root answer"), done_with_threading("db-1")]);
    let SendOutcome::Completed { message_id: root, .. } =
        h.manager.send_message(SendRequest::new("root question")).await.unwrap()
    else {
        panic!("send was rejected");
    };

    let reply = h.manager.conversation(&conversation.id).unwrap();
    let reply = reply.message(&root).unwrap();
    assert!(reply.supports_threading);
    assert_eq!(reply.database_message_id.as_deref(), Some("db-1"));

    let info = h.manager.create_thread(&root, &session).await.unwrap();
    assert_eq!(info.thread_session_id, "thread-session");
    assert_eq!(h.client.threads(), vec![("db-1".to_string(), session.clone())]);

    h.manager
        .send_message(SendRequest::new("follow up").in_thread(&info.thread_id))
        .await
        .unwrap();

    let streams = h.client.streams();
    let thread_call = streams.last().unwrap();
    assert_eq!(
        thread_call.binding.as_ref().unwrap().session_id,
        "thread-session"
    );
    assert_eq!(thread_call.request.thread_id.as_deref(), Some("thread-1"));

    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.conversations.len(), 1);
    let conversation = snapshot.current().unwrap();
    assert_eq!(conversation.session_id.unwrap().to_string(), session);
    assert_eq!(conversation.messages.len(), 4);
    for message in &conversation.messages[2..] {
        assert!(message.is_thread_message);
        assert_eq!(message.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(message.parent_message_id.as_deref(), Some(root.as_str()));
    }
    assert!(conversation.messages[1].thread_info.is_some());

    h.manager
        .send_message(SendRequest::new("back in main"))
        .await
        .unwrap();
    let streams = h.client.streams();
    assert_eq!(
        streams.last().unwrap().binding.as_ref().unwrap().session_id,
        session
    );
}

#[tokio::test]
async fn test_unknown_thread_rejected_before_mutation() {
    let h = harness(config()).await;
    let id = h.manager.current_conversation().unwrap().id;

    assert!(matches!(
        h.manager
            .send_message(SendRequest::new("lost").in_thread("missing"))
            .await,
        Err(ChatError::MessageNotFound(_))
    ));
    assert!(h.manager.conversation(&id).unwrap().messages.is_empty());
    assert!(!h.manager.snapshot().is_loading);
}

#[tokio::test]
async fn test_create_thread_requires_known_session() {
    let h = harness(config()).await;
    h.manager.send_message(SendRequest::new("q")).await.unwrap();
    let message = h.manager.current_conversation().unwrap().messages[1].id.clone();

    assert!(matches!(
        h.manager.create_thread(&message, "no-such-session").await,
        Err(ChatError::ConversationNotFound(_))
    ));
    assert!(h.client.threads().is_empty());
}
