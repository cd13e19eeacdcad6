use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use murmur_storage_model::{
    AddMembersOutcome, Attachment, CallParticipant, CallRepository, CallStatus, ConnectionQuality,
    Conversation, GroupCall, GroupPermission, GroupRepository, GroupRole, JoinOutcome,
    JoinRequest, JoinRequestRepository, JoinRequestStatus, LeaveOutcome, MediaType, Message,
    MessageRepository, NewAttachment, NewCallParticipant, NewGroup, NewMessage, Participant,
    PermissionType, PersistOutcome, Reaction, ReactionRepository,
};

#[derive(Default)]
struct StoreState {
    next_id: i64,
    messages: HashMap<i64, Message>,
    messages_by_client_id: HashMap<Uuid, i64>,
    attachments: HashMap<i64, Vec<Attachment>>,
    reactions: Vec<Reaction>,
    groups: HashMap<i64, Conversation>,
    members: HashMap<i64, Vec<Participant>>,
    permissions: HashMap<(i64, PermissionType), GroupRole>,
    join_requests: HashMap<i64, JoinRequest>,
    calls: HashMap<String, GroupCall>,
    call_participants: HashMap<String, Vec<CallParticipant>>,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn open_participant_mut(&mut self, call_id: &str, user_id: i64) -> Option<&mut CallParticipant> {
        self.call_participants
            .get_mut(call_id)
            .and_then(|rows| rows.iter_mut().find(|p| p.user_id == user_id && p.is_active()))
    }

    fn active_count(&self, call_id: &str) -> u32 {
        self.call_participants
            .get(call_id)
            .map(|rows| rows.iter().filter(|p| p.is_active()).count() as u32)
            .unwrap_or(0)
    }
}

/// 内存版聊天存储，实现用于开发和单测阶段
///
/// 所有仓储接口共用一把读写锁，比较并设置类操作在写锁内完成。
#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    state: Arc<RwLock<StoreState>>,
    /// 注入的消息写入失败次数（测试重投递）
    failing_writes: Arc<AtomicU32>,
    /// 注入的成员写入失败次数
    failing_member_writes: Arc<AtomicU32>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来 `count` 次消息写入失败
    pub fn fail_next_message_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// 让接下来 `count` 次批量加人失败
    pub fn fail_next_member_writes(&self, count: u32) {
        self.failing_member_writes.store(count, Ordering::SeqCst);
    }

    /// 尚未消耗的注入失败次数
    pub fn pending_write_failures(&self) -> u32 {
        self.failing_writes.load(Ordering::SeqCst)
    }

    /// 已持久化的消息数
    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    fn take_injected_failure(&self) -> bool {
        take_one(&self.failing_writes)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl MessageRepository for InMemoryChatStore {
    async fn insert_with_attachments(
        &self,
        message: NewMessage,
        attachments: Vec<NewAttachment>,
    ) -> Result<PersistOutcome> {
        if self.take_injected_failure() {
            return Err(anyhow!("injected message write failure"));
        }

        let mut state = self.state.write().await;
        if let Some(client_id) = message.client_message_id {
            if let Some(existing) = state
                .messages_by_client_id
                .get(&client_id)
                .and_then(|id| state.messages.get(id))
            {
                return Ok(PersistOutcome::Duplicate(existing.clone()));
            }
        }

        let id = state.next_id();
        let created_at = message.created_at;
        let stored = message.into_message(id);
        if let Some(client_id) = stored.client_message_id {
            state.messages_by_client_id.insert(client_id, id);
        }
        state.messages.insert(id, stored.clone());

        let mut rows = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let attachment_id = state.next_id();
            rows.push(Attachment {
                id: attachment_id,
                message_id: id,
                file_name: attachment.file_name,
                file_url: attachment.file_url,
                file_type: attachment.file_type,
                file_size: attachment.file_size,
                created_at,
            });
        }
        if !rows.is_empty() {
            state.attachments.insert(id, rows);
        }

        Ok(PersistOutcome::Inserted(stored))
    }

    async fn find_by_id(&self, message_id: i64) -> Result<Option<Message>> {
        Ok(self.state.read().await.messages.get(&message_id).cloned())
    }

    async fn find_by_client_id(&self, client_message_id: Uuid) -> Result<Option<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages_by_client_id
            .get(&client_message_id)
            .and_then(|id| state.messages.get(id))
            .cloned())
    }

    async fn attachments_of(&self, message_id: i64) -> Result<Vec<Attachment>> {
        Ok(self
            .state
            .read()
            .await
            .attachments
            .get(&message_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ReactionRepository for InMemoryChatStore {
    async fn insert_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Option<Reaction>> {
        let mut state = self.state.write().await;
        let exists = state
            .reactions
            .iter()
            .any(|r| r.message_id == message_id && r.user_id == user_id && r.emoji == emoji);
        if exists {
            return Ok(None);
        }
        let reaction = Reaction {
            id: state.next_id(),
            message_id,
            user_id,
            emoji: emoji.to_string(),
            reacted_at: Utc::now(),
        };
        state.reactions.push(reaction.clone());
        Ok(Some(reaction))
    }

    async fn delete_reaction(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.reactions.len();
        state
            .reactions
            .retain(|r| !(r.message_id == message_id && r.user_id == user_id && r.emoji == emoji));
        Ok(state.reactions.len() != before)
    }

    async fn reactions_of(&self, message_id: i64) -> Result<Vec<Reaction>> {
        Ok(self
            .state
            .read()
            .await
            .reactions
            .iter()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GroupRepository for InMemoryChatStore {
    async fn create_group(
        &self,
        group: NewGroup,
        permissions: Vec<(PermissionType, GroupRole)>,
    ) -> Result<Conversation> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let now = Utc::now();
        let conversation = Conversation {
            id,
            is_group: true,
            name: Some(group.name),
            description: group.description,
            max_members: group.max_members,
            is_public: group.is_public,
            require_approval: group.require_approval,
            invite_link: None,
            created_by: Some(group.created_by),
            created_at: now,
        };
        state.groups.insert(id, conversation.clone());
        state.members.insert(
            id,
            vec![Participant {
                conversation_id: id,
                user_id: group.created_by,
                role: GroupRole::Admin,
                joined_at: now,
            }],
        );
        for (permission, role) in permissions {
            state.permissions.insert((id, permission), role);
        }
        Ok(conversation)
    }

    async fn find_group(&self, group_id: i64) -> Result<Option<Conversation>> {
        Ok(self.state.read().await.groups.get(&group_id).cloned())
    }

    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Conversation>> {
        Ok(self
            .state
            .read()
            .await
            .groups
            .values()
            .find(|g| g.invite_link.as_deref() == Some(code))
            .cloned())
    }

    async fn set_invite_code(&self, group_id: i64, code: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let taken = state
            .groups
            .values()
            .any(|g| g.id != group_id && g.invite_link.as_deref() == Some(code));
        if taken {
            return Ok(false);
        }
        match state.groups.get_mut(&group_id) {
            Some(group) => {
                group.invite_link = Some(code.to_string());
                Ok(true)
            }
            None => Err(anyhow!("group {group_id} not found")),
        }
    }

    async fn member_role(&self, group_id: i64, user_id: i64) -> Result<Option<GroupRole>> {
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&group_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id))
            .map(|m| m.role))
    }

    async fn members(&self, group_id: i64) -> Result<Vec<Participant>> {
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn member_count(&self, group_id: i64) -> Result<u32> {
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&group_id)
            .map(|m| m.len() as u32)
            .unwrap_or(0))
    }

    async fn admin_count(&self, group_id: i64) -> Result<u32> {
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&group_id)
            .map(|m| m.iter().filter(|p| p.role == GroupRole::Admin).count() as u32)
            .unwrap_or(0))
    }

    async fn add_members_if_capacity(
        &self,
        group_id: i64,
        user_ids: &[i64],
        role: GroupRole,
    ) -> Result<AddMembersOutcome> {
        if take_one(&self.failing_member_writes) {
            return Err(anyhow!("injected member write failure"));
        }
        let mut state = self.state.write().await;
        let max = state
            .groups
            .get(&group_id)
            .map(|g| g.max_members)
            .ok_or_else(|| anyhow!("group {group_id} not found"))?;
        let members = state.members.entry(group_id).or_default();
        let current = members.len() as u32;

        let mut fresh: Vec<i64> = Vec::new();
        for user_id in user_ids {
            if !members.iter().any(|m| m.user_id == *user_id) && !fresh.contains(user_id) {
                fresh.push(*user_id);
            }
        }
        if current + fresh.len() as u32 > max {
            return Ok(AddMembersOutcome::CapacityExceeded { current, max });
        }

        let now = Utc::now();
        let added: Vec<Participant> = fresh
            .into_iter()
            .map(|user_id| Participant {
                conversation_id: group_id,
                user_id,
                role,
                joined_at: now,
            })
            .collect();
        members.extend(added.iter().cloned());
        Ok(AddMembersOutcome::Added(added))
    }

    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(members) = state.members.get_mut(&group_id) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|m| m.user_id != user_id);
        Ok(members.len() != before)
    }

    async fn update_role(&self, group_id: i64, user_id: i64, role: GroupRole) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .members
            .get_mut(&group_id)
            .and_then(|members| members.iter_mut().find(|m| m.user_id == user_id))
        {
            Some(member) => {
                member.role = role;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn groups_of_user(&self, user_id: i64) -> Result<Vec<i64>> {
        let state = self.state.read().await;
        let mut groups: Vec<i64> = state
            .members
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.user_id == user_id))
            .map(|(group_id, _)| *group_id)
            .collect();
        groups.sort_unstable();
        Ok(groups)
    }

    async fn permission(
        &self,
        group_id: i64,
        permission: PermissionType,
    ) -> Result<Option<GroupPermission>> {
        Ok(self
            .state
            .read()
            .await
            .permissions
            .get(&(group_id, permission))
            .map(|role| GroupPermission {
                conversation_id: group_id,
                permission_type: permission,
                required_role: *role,
            }))
    }

    async fn permissions(&self, group_id: i64) -> Result<Vec<GroupPermission>> {
        let state = self.state.read().await;
        let mut rows: Vec<GroupPermission> = state
            .permissions
            .iter()
            .filter(|((gid, _), _)| *gid == group_id)
            .map(|((gid, permission), role)| GroupPermission {
                conversation_id: *gid,
                permission_type: *permission,
                required_role: *role,
            })
            .collect();
        rows.sort_by_key(|p| p.permission_type.as_str());
        Ok(rows)
    }

    async fn replace_permissions(
        &self,
        group_id: i64,
        permissions: Vec<(PermissionType, GroupRole)>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.permissions.retain(|(gid, _), _| *gid != group_id);
        for (permission, role) in permissions {
            state.permissions.insert((group_id, permission), role);
        }
        Ok(())
    }
}

#[async_trait]
impl JoinRequestRepository for InMemoryChatStore {
    async fn create_join_request(
        &self,
        group_id: i64,
        user_id: i64,
        message: Option<String>,
    ) -> Result<Option<JoinRequest>> {
        let mut state = self.state.write().await;
        let pending_exists = state.join_requests.values().any(|r| {
            r.conversation_id == group_id
                && r.user_id == user_id
                && r.status == JoinRequestStatus::Pending
        });
        if pending_exists {
            return Ok(None);
        }
        let request = JoinRequest {
            id: state.next_id(),
            conversation_id: group_id,
            user_id,
            message,
            status: JoinRequestStatus::Pending,
            created_at: Utc::now(),
            reviewed_by: None,
            reviewed_at: None,
        };
        state.join_requests.insert(request.id, request.clone());
        Ok(Some(request))
    }

    async fn find_join_request(&self, request_id: i64) -> Result<Option<JoinRequest>> {
        Ok(self.state.read().await.join_requests.get(&request_id).cloned())
    }

    async fn pending_requests(&self, group_id: i64) -> Result<Vec<JoinRequest>> {
        let state = self.state.read().await;
        let mut rows: Vec<JoinRequest> = state
            .join_requests
            .values()
            .filter(|r| r.conversation_id == group_id && r.status == JoinRequestStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn resolve_join_request(
        &self,
        request_id: i64,
        status: JoinRequestStatus,
        reviewed_by: i64,
        reviewed_at: DateTime<Utc>,
    ) -> Result<Option<JoinRequest>> {
        let mut state = self.state.write().await;
        match state.join_requests.get_mut(&request_id) {
            Some(request) if request.status == JoinRequestStatus::Pending => {
                request.status = status;
                request.reviewed_by = Some(reviewed_by);
                request.reviewed_at = Some(reviewed_at);
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl CallRepository for InMemoryChatStore {
    async fn insert_call(
        &self,
        call: &GroupCall,
        initiator: NewCallParticipant,
    ) -> Result<Option<CallParticipant>> {
        let mut state = self.state.write().await;
        let has_active = state
            .calls
            .values()
            .any(|c| c.group_id == call.group_id && c.is_active());
        if has_active {
            return Ok(None);
        }
        let participant = initiator.into_participant(state.next_id());
        state.calls.insert(call.id.clone(), call.clone());
        state
            .call_participants
            .insert(call.id.clone(), vec![participant.clone()]);
        Ok(Some(participant))
    }

    async fn find_call(&self, call_id: &str) -> Result<Option<GroupCall>> {
        Ok(self.state.read().await.calls.get(call_id).cloned())
    }

    async fn active_call_for_group(&self, group_id: i64) -> Result<Option<GroupCall>> {
        Ok(self
            .state
            .read()
            .await
            .calls
            .values()
            .find(|c| c.group_id == group_id && c.is_active())
            .cloned())
    }

    async fn join_call(&self, participant: NewCallParticipant) -> Result<JoinOutcome> {
        let mut state = self.state.write().await;
        let max = match state.calls.get(&participant.call_id) {
            Some(call) if call.is_active() => call.max_participants,
            _ => return Ok(JoinOutcome::NotActive),
        };
        if state
            .open_participant_mut(&participant.call_id, participant.user_id)
            .is_some()
        {
            return Ok(JoinOutcome::AlreadyInCall);
        }
        if state.active_count(&participant.call_id) >= max {
            return Ok(JoinOutcome::Full);
        }
        let row = participant.into_participant(state.next_id());
        state
            .call_participants
            .entry(row.call_id.clone())
            .or_default()
            .push(row.clone());
        Ok(JoinOutcome::Joined(row))
    }

    async fn leave_call(
        &self,
        call_id: &str,
        user_id: i64,
        left_at: DateTime<Utc>,
    ) -> Result<Option<LeaveOutcome>> {
        let mut state = self.state.write().await;
        let Some(row) = state.open_participant_mut(call_id, user_id) else {
            return Ok(None);
        };
        row.left_at = Some(left_at);
        let participant = row.clone();
        let remaining = state.active_count(call_id);
        Ok(Some(LeaveOutcome {
            participant,
            remaining,
        }))
    }

    async fn end_call_if_active(
        &self,
        call_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Vec<i64>>> {
        let mut state = self.state.write().await;
        match state.calls.get_mut(call_id) {
            Some(call) if call.is_active() => {
                call.status = CallStatus::Ended;
                call.ended_at = Some(ended_at);
            }
            _ => return Ok(None),
        }
        let mut closed = Vec::new();
        if let Some(rows) = state.call_participants.get_mut(call_id) {
            for row in rows.iter_mut().filter(|p| p.is_active()) {
                row.left_at = Some(ended_at);
                closed.push(row.user_id);
            }
        }
        Ok(Some(closed))
    }

    async fn open_participant(
        &self,
        call_id: &str,
        user_id: i64,
    ) -> Result<Option<CallParticipant>> {
        Ok(self
            .state
            .read()
            .await
            .call_participants
            .get(call_id)
            .and_then(|rows| rows.iter().find(|p| p.user_id == user_id && p.is_active()))
            .cloned())
    }

    async fn participants(&self, call_id: &str, active_only: bool) -> Result<Vec<CallParticipant>> {
        Ok(self
            .state
            .read()
            .await
            .call_participants
            .get(call_id)
            .map(|rows| {
                rows.iter()
                    .filter(|p| !active_only || p.is_active())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_media(
        &self,
        call_id: &str,
        user_id: i64,
        media: MediaType,
        enabled: bool,
    ) -> Result<Option<CallParticipant>> {
        let mut state = self.state.write().await;
        Ok(state.open_participant_mut(call_id, user_id).map(|row| {
            match media {
                MediaType::Audio => row.is_audio_enabled = enabled,
                MediaType::Video => row.is_video_enabled = enabled,
            }
            row.clone()
        }))
    }

    async fn update_quality(
        &self,
        call_id: &str,
        user_id: i64,
        quality: ConnectionQuality,
    ) -> Result<Option<CallParticipant>> {
        let mut state = self.state.write().await;
        Ok(state.open_participant_mut(call_id, user_id).map(|row| {
            row.connection_quality = quality;
            row.clone()
        }))
    }

    async fn call_history(&self, group_id: i64, offset: u32, limit: u32) -> Result<Vec<GroupCall>> {
        let state = self.state.read().await;
        let mut calls: Vec<GroupCall> = state
            .calls
            .values()
            .filter(|c| c.group_id == group_id)
            .cloned()
            .collect();
        calls.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(calls
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_storage_model::{CallType, MessageStatus, MessageType};

    fn new_message(client_id: Option<Uuid>) -> NewMessage {
        NewMessage {
            client_message_id: client_id,
            conversation_id: 7,
            sender_id: 1,
            content: "hello".into(),
            message_type: MessageType::Group,
            content_type: "text".into(),
            target_id: Some(7),
            reply_to_message_id: None,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        }
    }

    fn call(id: &str, group_id: i64, max: u32) -> GroupCall {
        GroupCall {
            id: id.to_string(),
            group_id,
            initiator_id: 1,
            call_type: CallType::Audio,
            status: CallStatus::Active,
            max_participants: max,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    fn joiner(call_id: &str, user_id: i64) -> NewCallParticipant {
        NewCallParticipant {
            call_id: call_id.to_string(),
            user_id,
            joined_at: Utc::now(),
            is_audio_enabled: true,
            is_video_enabled: false,
        }
    }

    #[tokio::test]
    async fn message_insert_is_idempotent_on_client_id() {
        let store = InMemoryChatStore::new();
        let client_id = Uuid::new_v4();
        let attachment = NewAttachment {
            file_name: "a.png".into(),
            file_url: "https://cdn/a.png".into(),
            file_type: "image/png".into(),
            file_size: 10,
        };

        let first = store
            .insert_with_attachments(new_message(Some(client_id)), vec![attachment.clone()])
            .await
            .unwrap();
        let second = store
            .insert_with_attachments(new_message(Some(client_id)), vec![attachment])
            .await
            .unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.message().id, second.message().id);
        assert_eq!(store.message_count().await, 1);
        assert_eq!(store.attachments_of(first.message().id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryChatStore::new();
        store.fail_next_message_writes(1);
        assert!(store.insert_with_attachments(new_message(None), vec![]).await.is_err());
        assert!(store.insert_with_attachments(new_message(None), vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn reaction_uniqueness() {
        let store = InMemoryChatStore::new();
        assert!(store.insert_reaction(1, 2, "👍").await.unwrap().is_some());
        assert!(store.insert_reaction(1, 2, "👍").await.unwrap().is_none());
        assert!(store.insert_reaction(1, 2, "❤️").await.unwrap().is_some());
        assert!(store.delete_reaction(1, 2, "👍").await.unwrap());
        assert!(!store.delete_reaction(1, 2, "👍").await.unwrap());
        assert_eq!(store.reactions_of(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_members_respects_capacity_atomically() {
        let store = InMemoryChatStore::new();
        let group = store
            .create_group(
                NewGroup {
                    name: "g".into(),
                    description: None,
                    max_members: 3,
                    is_public: false,
                    require_approval: false,
                    created_by: 1,
                },
                vec![],
            )
            .await
            .unwrap();

        let outcome = store
            .add_members_if_capacity(group.id, &[2, 3, 4], GroupRole::Member)
            .await
            .unwrap();
        assert_eq!(outcome, AddMembersOutcome::CapacityExceeded { current: 1, max: 3 });
        assert_eq!(store.member_count(group.id).await.unwrap(), 1);

        match store
            .add_members_if_capacity(group.id, &[1, 2, 2], GroupRole::Member)
            .await
            .unwrap()
        {
            AddMembersOutcome::Added(added) => {
                assert_eq!(added.len(), 1);
                assert_eq!(added[0].user_id, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.admin_count(group.id).await.unwrap(), 1);
        assert_eq!(store.groups_of_user(2).await.unwrap(), vec![group.id]);
    }

    #[tokio::test]
    async fn one_active_call_per_group() {
        let store = InMemoryChatStore::new();
        assert!(store.insert_call(&call("c1", 7, 2), joiner("c1", 1)).await.unwrap().is_some());
        assert!(store.insert_call(&call("c2", 7, 2), joiner("c2", 2)).await.unwrap().is_none());
        assert!(store.insert_call(&call("c3", 8, 2), joiner("c3", 2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn join_leave_and_end_state_machine() {
        let store = InMemoryChatStore::new();
        store.insert_call(&call("c1", 7, 2), joiner("c1", 1)).await.unwrap();

        assert!(matches!(store.join_call(joiner("c1", 1)).await.unwrap(), JoinOutcome::AlreadyInCall));
        assert!(matches!(store.join_call(joiner("c1", 2)).await.unwrap(), JoinOutcome::Joined(_)));
        assert!(matches!(store.join_call(joiner("c1", 3)).await.unwrap(), JoinOutcome::Full));

        let left = store.leave_call("c1", 2, Utc::now()).await.unwrap().unwrap();
        assert_eq!(left.remaining, 1);
        assert!(store.leave_call("c1", 2, Utc::now()).await.unwrap().is_none());

        // 重新加入追加新记录，历史保留
        assert!(matches!(store.join_call(joiner("c1", 2)).await.unwrap(), JoinOutcome::Joined(_)));
        assert_eq!(store.participants("c1", false).await.unwrap().len(), 3);

        let closed = store.end_call_if_active("c1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(closed.len(), 2);
        assert!(store.end_call_if_active("c1", Utc::now()).await.unwrap().is_none());
        assert!(matches!(store.join_call(joiner("c1", 3)).await.unwrap(), JoinOutcome::NotActive));
        assert!(store.active_call_for_group(7).await.unwrap().is_none());
        assert_eq!(store.call_history(7, 0, 10).await.unwrap().len(), 1);
    }
}
