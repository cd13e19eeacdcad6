use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use murmur_conversation::application::commands::ReactionCommand;
use murmur_conversation::service::wire;
use murmur_im_core::ErrorCode;
use murmur_push::{ChatNotifier, InMemoryPushHub, PushEvent};
use murmur_storage_model::{MessageRepository, MessageStatus, MessageType, NewMessage};
use murmur_storage_repository::InMemoryChatStore;
use tokio::time::timeout;

async fn seed_message(store: &InMemoryChatStore) -> i64 {
    store
        .insert_with_attachments(
            NewMessage {
                client_message_id: None,
                conversation_id: 0,
                sender_id: 1,
                content: "hello".into(),
                message_type: MessageType::Public,
                content_type: "text".into(),
                target_id: None,
                reply_to_message_id: None,
                status: MessageStatus::Sent,
                created_at: Utc::now(),
            },
            Vec::new(),
        )
        .await
        .unwrap()
        .into_message()
        .id
}

fn reaction(message_id: i64, emoji: &str) -> ReactionCommand {
    ReactionCommand {
        message_id,
        user_id: 2,
        emoji: emoji.to_string(),
    }
}

#[tokio::test]
async fn duplicate_reaction_conflicts_and_missing_removal_is_not_found() {
    let store = InMemoryChatStore::new();
    let hub = InMemoryPushHub::new();
    let (notifier, _fanout) = ChatNotifier::spawn(Arc::new(hub.clone()), 64);
    let components = wire::initialize(Arc::new(store.clone()), notifier);
    let commands = &components.commands;
    let (_conn, mut rx) = hub.connect(9).await;

    let message_id = seed_message(&store).await;
    let added = commands
        .handle_add_reaction(reaction(message_id, "👍"))
        .await
        .unwrap();
    assert_eq!(added.emoji, "👍");

    let frame = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.event, PushEvent::ReceiveReaction);
    assert_eq!(frame.payload["message_id"], message_id);
    assert_eq!(frame.payload["reaction"]["emoji"], "👍");

    let duplicate = commands
        .handle_add_reaction(reaction(message_id, "👍"))
        .await
        .unwrap_err();
    assert_eq!(duplicate.code(), ErrorCode::Conflict);

    let missing_message = commands
        .handle_add_reaction(reaction(message_id + 100, "👍"))
        .await
        .unwrap_err();
    assert_eq!(missing_message.code(), ErrorCode::NotFound);

    commands
        .handle_remove_reaction(reaction(message_id, "👍"))
        .await
        .unwrap();
    let removed = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.event, PushEvent::RemoveReaction);
    assert_eq!(removed.payload["emoji"], "👍");

    let absent = commands
        .handle_remove_reaction(reaction(message_id, "👍"))
        .await
        .unwrap_err();
    assert_eq!(absent.code(), ErrorCode::NotFound);
    assert!(absent.is_business_denial());
}
