use std::sync::Arc;
use std::time::Duration;

use murmur_conversation::application::commands::{
    AddMembersCommand, ChangeRoleCommand, CreateGroupCommand, RemoveMemberCommand,
    ReviewJoinRequestCommand, UpdatePermissionsCommand,
};
use murmur_conversation::service::wire;
use murmur_conversation::{ConversationComponents, GroupDetails, InviteJoinOutcome, JoinDecision};
use murmur_im_core::{ChatError, ErrorCode};
use murmur_push::{ChatNotifier, InMemoryPushHub, PushEvent, PushFrame, group_room};
use murmur_storage_model::{GroupRepository, GroupRole, JoinRequestStatus, PermissionType};
use murmur_storage_repository::InMemoryChatStore;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

struct Fixture {
    store: InMemoryChatStore,
    hub: InMemoryPushHub,
    components: ConversationComponents,
}

fn fixture() -> Fixture {
    let store = InMemoryChatStore::new();
    let hub = InMemoryPushHub::new();
    let (notifier, _fanout) = ChatNotifier::spawn(Arc::new(hub.clone()), 64);
    let components = wire::initialize(Arc::new(store.clone()), notifier);
    Fixture {
        store,
        hub,
        components,
    }
}

fn create(creator_id: i64, members: Vec<i64>) -> CreateGroupCommand {
    CreateGroupCommand {
        creator_id,
        name: "team".into(),
        description: None,
        max_members: Some(4),
        is_public: false,
        require_approval: false,
        initial_members: members,
    }
}

async fn create_group(fixture: &Fixture, creator_id: i64, members: Vec<i64>) -> GroupDetails {
    fixture
        .components
        .commands
        .handle_create_group(create(creator_id, members))
        .await
        .unwrap()
}

fn code_of(err: ChatError) -> ErrorCode {
    assert!(err.is_business_denial(), "unexpected failure: {err}");
    err.code()
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

#[tokio::test]
async fn create_group_seeds_admin_permissions_and_members() {
    let fixture = fixture();
    let details = create_group(&fixture, 1, vec![2, 3, 1, 2]).await;
    let group_id = details.group.id;

    assert_eq!(details.member_count, 3);
    assert_eq!(
        fixture.store.member_role(group_id, 1).await.unwrap(),
        Some(GroupRole::Admin)
    );
    assert_eq!(
        fixture.store.member_role(group_id, 2).await.unwrap(),
        Some(GroupRole::Member)
    );
    assert_eq!(
        fixture.store.permissions(group_id).await.unwrap().len(),
        PermissionType::ALL.len()
    );

    let commands = &fixture.components.commands;
    let mut blank = create(1, vec![]);
    blank.name = "   ".into();
    assert!(matches!(
        commands.handle_create_group(blank).await,
        Err(ChatError::Validation(_))
    ));
    let mut tiny = create(1, vec![]);
    tiny.max_members = Some(1);
    assert!(matches!(
        commands.handle_create_group(tiny).await,
        Err(ChatError::Validation(_))
    ));
}

#[tokio::test]
async fn adding_members_respects_permission_and_capacity() {
    let fixture = fixture();
    let (_conn, mut rx) = fixture.hub.connect(2).await;
    let group_id = create_group(&fixture, 1, vec![2]).await.group.id;
    let commands = &fixture.components.commands;

    let denied = commands
        .handle_add_members(AddMembersCommand {
            group_id,
            actor_id: 2,
            user_ids: vec![5],
        })
        .await
        .unwrap_err();
    assert_eq!(code_of(denied), ErrorCode::PermissionDenied);

    let outsider = commands
        .handle_add_members(AddMembersCommand {
            group_id,
            actor_id: 9,
            user_ids: vec![5],
        })
        .await
        .unwrap_err();
    assert_eq!(outsider.user_message(), "You are not a member of this group");

    let (new_conn, mut new_rx) = fixture.hub.connect(3).await;
    let added = commands
        .handle_add_members(AddMembersCommand {
            group_id,
            actor_id: 1,
            user_ids: vec![3, 2],
        })
        .await
        .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].user_id, 3);
    assert!(fixture.hub.room_members(&group_room(group_id)).await.contains(&new_conn));

    let frame = expect_event(&mut rx, PushEvent::GroupMemberAdded).await;
    assert_eq!(frame.payload["member"]["user_id"], 3);
    let own = expect_event(&mut new_rx, PushEvent::GroupMemberAdded).await;
    assert_eq!(own.payload["group_id"], group_id);

    let full = commands
        .handle_add_members(AddMembersCommand {
            group_id,
            actor_id: 1,
            user_ids: vec![6, 7],
        })
        .await
        .unwrap_err();
    assert_eq!(code_of(full), ErrorCode::CapacityExceeded);
    assert_eq!(fixture.store.member_count(group_id).await.unwrap(), 3);
}

#[tokio::test]
async fn last_admin_cannot_leave_or_be_removed_while_others_remain() {
    let fixture = fixture();
    let group_id = create_group(&fixture, 1, vec![2, 3]).await.group.id;
    let commands = &fixture.components.commands;

    commands
        .handle_change_role(ChangeRoleCommand {
            group_id,
            actor_id: 1,
            target_id: 2,
            role: GroupRole::Moderator,
        })
        .await
        .unwrap();

    let removal = commands
        .handle_remove_member(RemoveMemberCommand {
            group_id,
            actor_id: 2,
            target_id: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(code_of(removal), ErrorCode::LastAdmin);

    let leave = commands.handle_leave_group(group_id, 1).await.unwrap_err();
    assert_eq!(code_of(leave), ErrorCode::LastAdmin);

    let demote = commands
        .handle_change_role(ChangeRoleCommand {
            group_id,
            actor_id: 1,
            target_id: 1,
            role: GroupRole::Member,
        })
        .await
        .unwrap_err();
    assert_eq!(code_of(demote), ErrorCode::LastAdmin);

    // 版主可以移除普通成员
    commands
        .handle_remove_member(RemoveMemberCommand {
            group_id,
            actor_id: 2,
            target_id: 3,
        })
        .await
        .unwrap();

    commands
        .handle_change_role(ChangeRoleCommand {
            group_id,
            actor_id: 1,
            target_id: 2,
            role: GroupRole::Admin,
        })
        .await
        .unwrap();
    commands.handle_leave_group(group_id, 1).await.unwrap();
    assert_eq!(fixture.store.member_role(group_id, 1).await.unwrap(), None);
}

#[tokio::test]
async fn sole_admin_may_leave_an_otherwise_empty_group() {
    let fixture = fixture();
    let group_id = create_group(&fixture, 1, vec![]).await.group.id;
    let (conn, mut rx) = fixture.hub.connect(1).await;
    fixture
        .components
        .commands
        .handle_leave_group(group_id, 1)
        .await
        .unwrap();

    assert_eq!(fixture.store.member_count(group_id).await.unwrap(), 0);
    assert!(!fixture.hub.room_members(&group_room(group_id)).await.contains(&conn));
    let frame = expect_event(&mut rx, PushEvent::GroupMemberRemoved).await;
    assert_eq!(frame.payload["reason"], "left");
}

#[tokio::test]
async fn invite_links_allow_direct_join() {
    let fixture = fixture();
    let group_id = create_group(&fixture, 1, vec![2]).await.group.id;
    let commands = &fixture.components.commands;

    let denied = commands.handle_get_invite_link(group_id, 2).await.unwrap_err();
    assert_eq!(code_of(denied), ErrorCode::PermissionDenied);

    let code = commands.handle_get_invite_link(group_id, 1).await.unwrap();
    assert_eq!(code.len(), 8);
    assert_eq!(commands.handle_get_invite_link(group_id, 1).await.unwrap(), code);

    match commands.handle_join_via_invite(&code, 7).await.unwrap() {
        InviteJoinOutcome::Joined { group_id: joined, member } => {
            assert_eq!(joined, group_id);
            assert_eq!(member.role, GroupRole::Member);
        }
        other => panic!("expected direct join, got {other:?}"),
    }

    let again = commands.handle_join_via_invite(&code, 7).await.unwrap_err();
    assert_eq!(code_of(again), ErrorCode::Conflict);

    let rotated = commands
        .handle_regenerate_invite_link(group_id, 1)
        .await
        .unwrap();
    assert_eq!(
        fixture
            .store
            .find_by_invite_code(&rotated)
            .await
            .unwrap()
            .map(|g| g.id),
        Some(group_id)
    );
    if rotated != code {
        let stale = commands.handle_join_via_invite(&code, 8).await.unwrap_err();
        assert_eq!(code_of(stale), ErrorCode::NotFound);
    }
}

#[tokio::test]
async fn approval_groups_queue_join_requests_for_review() {
    let fixture = fixture();
    let commands = &fixture.components.commands;
    let (_admin_conn, mut admin_rx) = fixture.hub.connect(1).await;
    let mut draft = create(1, vec![]);
    draft.require_approval = true;
    let group_id = commands.handle_create_group(draft).await.unwrap().group.id;
    let code = commands.handle_get_invite_link(group_id, 1).await.unwrap();

    let request = match commands.handle_join_via_invite(&code, 5).await.unwrap() {
        InviteJoinOutcome::Pending(request) => request,
        other => panic!("expected pending request, got {other:?}"),
    };
    assert_eq!(request.status, JoinRequestStatus::Pending);
    assert_eq!(fixture.store.member_role(group_id, 5).await.unwrap(), None);

    let duplicate = commands.handle_join_via_invite(&code, 5).await.unwrap_err();
    assert_eq!(code_of(duplicate), ErrorCode::Conflict);

    let pending = fixture
        .components
        .queries
        .pending_requests(group_id, 1)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let approved = commands
        .handle_review_join_request(ReviewJoinRequestCommand {
            group_id,
            actor_id: 1,
            request_id: request.id,
            decision: JoinDecision::Approve,
            reason: None,
        })
        .await
        .unwrap();
    assert_eq!(approved.status, JoinRequestStatus::Approved);
    assert_eq!(approved.reviewed_by, Some(1));
    assert_eq!(
        fixture.store.member_role(group_id, 5).await.unwrap(),
        Some(GroupRole::Member)
    );

    let handled = expect_event(&mut admin_rx, PushEvent::GroupJoinRequestHandled).await;
    assert_eq!(handled.payload["action"], "approve");

    let twice = commands
        .handle_review_join_request(ReviewJoinRequestCommand {
            group_id,
            actor_id: 1,
            request_id: request.id,
            decision: JoinDecision::Reject,
            reason: Some("late".into()),
        })
        .await
        .unwrap_err();
    assert_eq!(code_of(twice), ErrorCode::Conflict);

    let rejected = commands
        .handle_request_to_join(group_id, 6, Some("hi".into()))
        .await
        .unwrap();
    let resolved = commands
        .handle_review_join_request(ReviewJoinRequestCommand {
            group_id,
            actor_id: 1,
            request_id: rejected.id,
            decision: JoinDecision::Reject,
            reason: None,
        })
        .await
        .unwrap();
    assert_eq!(resolved.status, JoinRequestStatus::Rejected);
    assert_eq!(fixture.store.member_role(group_id, 6).await.unwrap(), None);
}

#[tokio::test]
async fn failed_admission_leaves_join_request_pending() {
    let fixture = fixture();
    let commands = &fixture.components.commands;
    let mut draft = create(1, vec![]);
    draft.require_approval = true;
    let group_id = commands.handle_create_group(draft).await.unwrap().group.id;
    let request = commands
        .handle_request_to_join(group_id, 5, None)
        .await
        .unwrap();

    let approve = ReviewJoinRequestCommand {
        group_id,
        actor_id: 1,
        request_id: request.id,
        decision: JoinDecision::Approve,
        reason: None,
    };
    fixture.store.fail_next_member_writes(1);
    let err = commands
        .handle_review_join_request(approve.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Storage(_)));
    assert_eq!(fixture.store.member_role(group_id, 5).await.unwrap(), None);

    let pending = fixture
        .components
        .queries
        .pending_requests(group_id, 1)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request.id);

    let approved = commands.handle_review_join_request(approve).await.unwrap();
    assert_eq!(approved.status, JoinRequestStatus::Approved);
    assert_eq!(
        fixture.store.member_role(group_id, 5).await.unwrap(),
        Some(GroupRole::Member)
    );
}

#[tokio::test]
async fn permission_rows_are_fail_closed_and_admin_managed() {
    let fixture = fixture();
    let group_id = create_group(&fixture, 1, vec![2, 3]).await.group.id;
    let commands = &fixture.components.commands;
    let queries = &fixture.components.queries;

    commands
        .handle_change_role(ChangeRoleCommand {
            group_id,
            actor_id: 1,
            target_id: 2,
            role: GroupRole::Moderator,
        })
        .await
        .unwrap();

    assert!(queries.has_permission(group_id, 2, PermissionType::AddMembers).await.unwrap());
    assert!(!queries.has_permission(group_id, 3, PermissionType::AddMembers).await.unwrap());
    assert!(!queries.has_permission(group_id, 9, PermissionType::AddMembers).await.unwrap());

    let by_moderator = commands
        .handle_update_permissions(UpdatePermissionsCommand {
            group_id,
            actor_id: 2,
            permissions: vec![(PermissionType::AddMembers, GroupRole::Member)],
        })
        .await
        .unwrap_err();
    assert_eq!(code_of(by_moderator), ErrorCode::PermissionDenied);

    commands
        .handle_update_permissions(UpdatePermissionsCommand {
            group_id,
            actor_id: 1,
            permissions: vec![(PermissionType::AddMembers, GroupRole::Member)],
        })
        .await
        .unwrap();

    assert!(queries.has_permission(group_id, 3, PermissionType::AddMembers).await.unwrap());
    // 未配置的操作一律拒绝，管理员除外
    assert!(!queries.has_permission(group_id, 2, PermissionType::PinMessages).await.unwrap());
    assert!(queries.has_permission(group_id, 1, PermissionType::PinMessages).await.unwrap());
    assert_eq!(
        queries.user_permissions(group_id, 3).await.unwrap(),
        vec![PermissionType::AddMembers]
    );
    assert_eq!(
        queries.user_permissions(group_id, 1).await.unwrap().len(),
        PermissionType::ALL.len()
    );
}
