use std::sync::Arc;
use std::time::Duration;

use murmur_call::application::commands::{
    CallAnswerCommand, CallOfferCommand, IceCandidateCommand, JoinCallCommand, StartCallCommand,
};
use murmur_call::config::CallConfig;
use murmur_call::service::wire;
use murmur_call::{
    CallCommandHandler, CallServiceBootstrap, DirectCallRelay, GroupCallSessionManager, SignalKind,
};
use murmur_im_core::config::parse_config;
use murmur_im_core::{ChatError, ErrorCode};
use murmur_push::{ChatNotifier, InMemoryPushHub, PushEvent, PushFrame};
use murmur_storage_model::{
    CallRepository, CallStatus, CallType, ConnectionQuality, GroupRepository, GroupRole,
    MediaType, NewGroup, default_permissions,
};
use murmur_storage_repository::InMemoryChatStore;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

struct Fixture {
    store: InMemoryChatStore,
    hub: InMemoryPushHub,
    notifier: ChatNotifier,
    sessions: Arc<GroupCallSessionManager>,
}

fn fixture() -> Fixture {
    let store = InMemoryChatStore::new();
    let hub = InMemoryPushHub::new();
    let (notifier, _fanout) = ChatNotifier::spawn(Arc::new(hub.clone()), 64);
    let sessions = wire::with_store(
        Arc::new(store.clone()),
        notifier.clone(),
        &CallConfig::default(),
    );
    Fixture {
        store,
        hub,
        notifier,
        sessions,
    }
}

/// 用户 1 为管理员，其余为普通成员
async fn group_with(fixture: &Fixture, members: &[i64]) -> i64 {
    let group = fixture
        .store
        .create_group(
            NewGroup {
                name: "call-room".into(),
                description: None,
                max_members: 20,
                is_public: false,
                require_approval: false,
                created_by: 1,
            },
            default_permissions(),
        )
        .await
        .unwrap();
    fixture
        .store
        .add_members_if_capacity(group.id, members, GroupRole::Member)
        .await
        .unwrap();
    group.id
}

async fn listen(fixture: &Fixture, user_id: i64, group_id: i64) -> UnboundedReceiver<PushFrame> {
    let (_, rx) = fixture.hub.connect(user_id).await;
    fixture.notifier.join_group_room(user_id, group_id).await;
    rx
}

async fn expect_event(rx: &mut UnboundedReceiver<PushFrame>, event: PushEvent) -> PushFrame {
    timeout(Duration::from_secs(1), async {
        loop {
            let frame = rx.recv().await.expect("connection open");
            if frame.event == event {
                return frame;
            }
        }
    })
    .await
    .expect("event within timeout")
}

fn code_of(err: ChatError) -> ErrorCode {
    assert!(err.is_business_denial(), "unexpected failure: {err}");
    err.code()
}

#[tokio::test]
async fn start_join_and_capacity() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2, 3]).await;
    let mut observer = listen(&fixture, 3, group_id).await;

    let call = fixture
        .sessions
        .start_call(group_id, 1, CallType::Video, Some(2))
        .await
        .unwrap();
    assert_eq!(call.status, CallStatus::Active);
    assert_eq!(call.active_participants_count, 1);
    assert!(call.participants[0].is_video_enabled);

    let started = expect_event(&mut observer, PushEvent::GroupCallStarted).await;
    assert_eq!(started.payload["group_id"], json!(group_id));
    assert_eq!(started.payload["call"]["id"], json!(call.id));

    let joined = fixture
        .sessions
        .join_call(&call.id, 2, true, false)
        .await
        .unwrap();
    assert_eq!(joined.active_participants_count, 2);
    let frame = expect_event(&mut observer, PushEvent::GroupCallParticipantJoined).await;
    assert_eq!(frame.payload["participant"]["user_id"], json!(2));

    let err = fixture
        .sessions
        .join_call(&call.id, 3, true, false)
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::CapacityExceeded);

    let err = fixture
        .sessions
        .join_call(&call.id, 2, true, false)
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::Conflict);
}

#[tokio::test]
async fn audio_call_starts_with_video_off() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[]).await;
    let call = fixture
        .sessions
        .start_call(group_id, 1, CallType::Audio, None)
        .await
        .unwrap();
    assert_eq!(call.max_participants, 10);
    assert!(call.participants[0].is_audio_enabled);
    assert!(!call.participants[0].is_video_enabled);
}

#[tokio::test]
async fn start_call_validates_caller_and_limits() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2]).await;

    let err = fixture
        .sessions
        .start_call(group_id, 9, CallType::Audio, None)
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::PermissionDenied);

    for max in [0, 51] {
        let err = fixture
            .sessions
            .start_call(group_id, 1, CallType::Audio, Some(max))
            .await
            .unwrap_err();
        assert_eq!(code_of(err), ErrorCode::InvalidParameter);
    }

    fixture
        .sessions
        .start_call(group_id, 1, CallType::Audio, None)
        .await
        .unwrap();
    let err = fixture
        .sessions
        .start_call(group_id, 2, CallType::Video, None)
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::Conflict);
}

#[tokio::test]
async fn last_participant_leaving_ends_the_call() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2]).await;
    let mut observer = listen(&fixture, 2, group_id).await;

    let call = fixture
        .sessions
        .start_call(group_id, 1, CallType::Audio, None)
        .await
        .unwrap();

    let summary = fixture.sessions.leave_call(&call.id, 1).await.unwrap();
    assert!(summary.call_ended);
    assert!(!summary.participant.is_active);

    let left = expect_event(&mut observer, PushEvent::GroupCallParticipantLeft).await;
    assert_eq!(left.payload["reason"], json!("user left"));
    let ended = expect_event(&mut observer, PushEvent::GroupCallEnded).await;
    assert_eq!(ended.payload["reason"], json!("no active participants"));

    let stored = fixture.store.find_call(&call.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CallStatus::Ended);
    assert!(stored.ended_at.is_some());

    let err = fixture
        .sessions
        .join_call(&call.id, 2, true, true)
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::Conflict);

    // 旧通话结束后可以发起新通话
    fixture
        .sessions
        .start_call(group_id, 2, CallType::Audio, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn leave_keeps_call_open_while_others_remain() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2]).await;
    let call = fixture
        .sessions
        .start_call(group_id, 1, CallType::Audio, None)
        .await
        .unwrap();
    fixture.sessions.join_call(&call.id, 2, true, false).await.unwrap();

    let summary = fixture.sessions.leave_call(&call.id, 1).await.unwrap();
    assert!(!summary.call_ended);

    let err = fixture.sessions.leave_call(&call.id, 1).await.unwrap_err();
    assert_eq!(code_of(err), ErrorCode::NotFound);

    let active = fixture
        .sessions
        .get_active_call(group_id, 2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.active_participants_count, 1);

    // 离开过的用户可以重新加入
    fixture.sessions.join_call(&call.id, 1, true, false).await.unwrap();
    let records = fixture
        .sessions
        .get_call_participants(&call.id, 1)
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records.iter().filter(|p| p.is_active).count(), 2);
}

#[tokio::test]
async fn concurrent_joins_never_exceed_capacity() {
    let fixture = fixture();
    let members: Vec<i64> = (2..=9).collect();
    let group_id = group_with(&fixture, &members).await;
    let call = fixture
        .sessions
        .start_call(group_id, 1, CallType::Audio, Some(3))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for user_id in members {
        let sessions = fixture.sessions.clone();
        let call_id = call.id.clone();
        tasks.push(tokio::spawn(async move {
            sessions.join_call(&call_id, user_id, true, false).await
        }));
    }

    let mut joined = 0;
    let mut full = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => joined += 1,
            Err(err) => {
                assert_eq!(code_of(err), ErrorCode::CapacityExceeded);
                full += 1;
            }
        }
    }
    assert_eq!(joined, 2);
    assert_eq!(full, 6);

    let active = fixture.store.participants(&call.id, true).await.unwrap();
    assert_eq!(active.len(), 3);
}

#[tokio::test]
async fn concurrent_leaves_end_the_call_once() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2, 3, 4]).await;
    let call = fixture
        .sessions
        .start_call(group_id, 1, CallType::Video, None)
        .await
        .unwrap();
    for user_id in [2, 3, 4] {
        fixture
            .sessions
            .join_call(&call.id, user_id, true, true)
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for user_id in [1, 2, 3, 4] {
        let sessions = fixture.sessions.clone();
        let call_id = call.id.clone();
        tasks.push(tokio::spawn(async move {
            sessions.leave_call(&call_id, user_id).await
        }));
    }

    let mut endings = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().call_ended {
            endings += 1;
        }
    }
    assert_eq!(endings, 1);

    let stored = fixture.store.find_call(&call.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CallStatus::Ended);
}

#[tokio::test]
async fn end_call_requires_initiator_or_moderator() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2, 3]).await;
    let mut observer = listen(&fixture, 3, group_id).await;

    let call = fixture
        .sessions
        .start_call(group_id, 2, CallType::Audio, None)
        .await
        .unwrap();
    fixture.sessions.join_call(&call.id, 3, true, false).await.unwrap();

    let err = fixture.sessions.end_call(&call.id, 3).await.unwrap_err();
    assert_eq!(code_of(err), ErrorCode::PermissionDenied);

    // 管理员可以结束他人发起的通话
    fixture.sessions.end_call(&call.id, 1).await.unwrap();
    let ended = expect_event(&mut observer, PushEvent::GroupCallEnded).await;
    assert_eq!(ended.payload["reason"], json!("ended by user 1"));

    let participants = fixture.store.participants(&call.id, true).await.unwrap();
    assert!(participants.is_empty());

    let err = fixture.sessions.end_call(&call.id, 2).await.unwrap_err();
    assert_eq!(code_of(err), ErrorCode::Conflict);

    let err = fixture.sessions.end_call("missing", 1).await.unwrap_err();
    assert_eq!(code_of(err), ErrorCode::NotFound);
}

#[tokio::test]
async fn media_and_quality_updates_are_broadcast() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2]).await;
    let mut observer = listen(&fixture, 2, group_id).await;
    let call = fixture
        .sessions
        .start_call(group_id, 1, CallType::Video, None)
        .await
        .unwrap();

    let participant = fixture
        .sessions
        .toggle_media(&call.id, 1, MediaType::Video, false)
        .await
        .unwrap();
    assert!(!participant.is_video_enabled);
    let frame = expect_event(&mut observer, PushEvent::GroupCallMediaToggled).await;
    assert_eq!(frame.payload["media_type"], json!("video"));
    assert_eq!(frame.payload["enabled"], json!(false));

    let participant = fixture
        .sessions
        .update_connection_quality(&call.id, 1, ConnectionQuality::Poor)
        .await
        .unwrap();
    assert_eq!(participant.connection_quality, ConnectionQuality::Poor);
    let frame = expect_event(&mut observer, PushEvent::GroupCallConnectionQualityUpdated).await;
    assert_eq!(frame.payload["quality"], json!("poor"));

    let err = fixture
        .sessions
        .toggle_media(&call.id, 2, MediaType::Audio, false)
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::NotFound);
}

#[tokio::test]
async fn signals_are_relayed_to_the_target_only() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2, 3]).await;
    let call = fixture
        .sessions
        .start_call(group_id, 1, CallType::Video, None)
        .await
        .unwrap();
    fixture.sessions.join_call(&call.id, 2, true, true).await.unwrap();
    let (_, mut target) = fixture.hub.connect(2).await;

    fixture
        .sessions
        .relay_signal(&call.id, 1, 2, SignalKind::Offer, json!({ "sdp": "v=0" }))
        .await
        .unwrap();
    let frame = expect_event(&mut target, PushEvent::ReceiveGroupCallOffer).await;
    assert_eq!(frame.payload["from_user_id"], json!(1));
    assert_eq!(frame.payload["data"]["sdp"], json!("v=0"));

    let err = fixture
        .sessions
        .relay_signal(&call.id, 3, 2, SignalKind::IceCandidate, json!({}))
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::PermissionDenied);

    let err = fixture
        .sessions
        .relay_signal(&call.id, 1, 3, SignalKind::Answer, json!({}))
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::NotFound);
}

#[tokio::test]
async fn history_lists_calls_newest_first() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2]).await;

    let first = fixture
        .sessions
        .start_call(group_id, 1, CallType::Audio, None)
        .await
        .unwrap();
    fixture.sessions.leave_call(&first.id, 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = fixture
        .sessions
        .start_call(group_id, 2, CallType::Video, None)
        .await
        .unwrap();

    let history = fixture
        .sessions
        .get_call_history(group_id, 1, 1, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second.id);
    assert_eq!(history[1].id, first.id);
    assert_eq!(history[1].status, CallStatus::Ended);

    let page = fixture
        .sessions
        .get_call_history(group_id, 1, 2, Some(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, first.id);

    let err = fixture
        .sessions
        .get_call_history(group_id, 9, 1, None)
        .await
        .unwrap_err();
    assert_eq!(code_of(err), ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn command_handler_drives_the_session_manager() {
    let fixture = fixture();
    let group_id = group_with(&fixture, &[2]).await;
    let commands = CallCommandHandler::new(
        fixture.sessions.clone(),
        Arc::new(DirectCallRelay::new(fixture.notifier.clone())),
    );

    let start: StartCallCommand = serde_json::from_value(json!({
        "group_id": group_id,
        "user_id": 1,
        "call_type": "audio",
        "max_participants": 2,
    }))
    .unwrap();
    let call = commands.handle_start_call(start).await.unwrap();

    let join: JoinCallCommand =
        serde_json::from_value(json!({ "call_id": call.id, "user_id": 2 })).unwrap();
    let joined = commands.handle_join_call(join).await.unwrap();
    assert_eq!(joined.active_participants_count, 2);

    commands.handle_end_call(&call.id, 1).await.unwrap();
    assert!(
        fixture
            .sessions
            .get_active_call(group_id, 2)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn direct_call_signals_reach_the_target_user() {
    let fixture = fixture();
    let relay = DirectCallRelay::new(fixture.notifier.clone());
    let (_, mut callee) = fixture.hub.connect(2).await;
    let (_, mut caller) = fixture.hub.connect(1).await;

    relay.send_offer(1, 2, "v=0 offer", Some("AUDIO")).unwrap();
    let frame = expect_event(&mut callee, PushEvent::ReceiveCallOffer).await;
    assert_eq!(frame.payload["from_user_id"], json!(1));
    assert_eq!(frame.payload["offer"], json!("v=0 offer"));
    assert_eq!(frame.payload["call_type"], json!("audio"));

    relay.send_offer(1, 2, "v=0 again", Some("hologram")).unwrap();
    let frame = expect_event(&mut callee, PushEvent::ReceiveCallOffer).await;
    assert_eq!(frame.payload["call_type"], json!("video"));

    relay.send_answer(2, 1, "v=0 answer").unwrap();
    let frame = expect_event(&mut caller, PushEvent::ReceiveCallAnswer).await;
    assert_eq!(frame.payload["from_user_id"], json!(2));
    assert_eq!(frame.payload["answer"], json!("v=0 answer"));

    relay.send_ice_candidate(2, 1, "candidate:1").unwrap();
    let frame = expect_event(&mut caller, PushEvent::ReceiveIceCandidate).await;
    assert_eq!(frame.payload["candidate"], json!("candidate:1"));

    relay.end_call(1, 2).unwrap();
    let frame = expect_event(&mut callee, PushEvent::CallEnded).await;
    assert_eq!(frame.payload["from_user_id"], json!(1));
}

#[tokio::test]
async fn direct_call_rejects_missing_target_or_body() {
    let fixture = fixture();
    let relay = DirectCallRelay::new(fixture.notifier.clone());

    assert!(matches!(
        relay.send_offer(1, 0, "v=0", None),
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        relay.send_offer(1, 2, "  ", None),
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        relay.send_answer(2, 1, ""),
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(relay.end_call(1, -4), Err(ChatError::Validation(_))));
}

#[tokio::test]
async fn bootstrap_builds_in_memory_components_from_config() {
    let app = parse_config(
        r#"
        [services.call]
        default_max_participants = 4
        "#,
    )
    .unwrap();
    let components = CallServiceBootstrap::build(&app).await.unwrap();
    let (_, mut callee) = components.hub.connect(2).await;

    let offer: CallOfferCommand = serde_json::from_value(json!({
        "from_user_id": 1,
        "target_user_id": 2,
        "offer": "v=0",
    }))
    .unwrap();
    components.commands.handle_call_offer(offer).unwrap();
    let frame = expect_event(&mut callee, PushEvent::ReceiveCallOffer).await;
    assert_eq!(frame.payload["call_type"], json!("video"));

    let answer: CallAnswerCommand = serde_json::from_value(json!({
        "from_user_id": 2,
        "target_user_id": 1,
        "answer": "v=0",
    }))
    .unwrap();
    components.commands.handle_call_answer(answer).unwrap();
    let candidate: IceCandidateCommand = serde_json::from_value(json!({
        "from_user_id": 2,
        "target_user_id": 1,
        "candidate": "candidate:0",
    }))
    .unwrap();
    components.commands.handle_ice_candidate(candidate).unwrap();
    components.commands.handle_hang_up(2, 1).unwrap();

    let start: StartCallCommand = serde_json::from_value(json!({
        "group_id": 404,
        "user_id": 1,
        "call_type": "video",
    }))
    .unwrap();
    let err = components.commands.handle_start_call(start).await.unwrap_err();
    assert!(err.is_business_denial());
}
