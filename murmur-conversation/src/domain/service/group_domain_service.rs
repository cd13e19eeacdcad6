//! 群组领域服务
//!
//! 成员管理、角色变更、邀请链接与入群申请。
//! 同一群的成员变更按群 ID 串行执行，保证容量与最后管理员检查不被并发绕过。

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use murmur_im_core::{ChatError, ChatResult, ErrorCode, KeyedLocks, StorageResultExt};
use murmur_push::{ChatNotifier, PushEvent};
use murmur_storage_model::{
    AddMembersOutcome, Conversation, DEFAULT_MAX_MEMBERS, GroupRepository, GroupRole,
    JoinRequest, JoinRequestRepository, JoinRequestStatus, NewGroup, Participant, PermissionType,
    default_permissions,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::domain::model::{
    GroupDetails, INVITE_CODE_ATTEMPTS, InviteJoinOutcome, JoinDecision, MAX_GROUP_CAPACITY,
    MIN_GROUP_CAPACITY, generate_invite_code,
};
use crate::domain::service::permission_service::{PermissionResolver, not_a_member};

/// 新建群组的参数
#[derive(Debug, Clone)]
pub struct GroupDraft {
    pub name: String,
    pub description: Option<String>,
    pub max_members: Option<u32>,
    pub is_public: bool,
    pub require_approval: bool,
    pub initial_members: Vec<i64>,
}

pub struct GroupDomainService {
    groups: Arc<dyn GroupRepository>,
    requests: Arc<dyn JoinRequestRepository>,
    permissions: Arc<PermissionResolver>,
    notifier: ChatNotifier,
    locks: KeyedLocks<i64>,
}

impl GroupDomainService {
    pub fn new(
        groups: Arc<dyn GroupRepository>,
        requests: Arc<dyn JoinRequestRepository>,
        permissions: Arc<PermissionResolver>,
        notifier: ChatNotifier,
    ) -> Self {
        Self {
            groups,
            requests,
            permissions,
            notifier,
            locks: KeyedLocks::new(),
        }
    }

    /// 创建群组：创建者为管理员，写入默认权限，加入初始成员
    #[instrument(skip(self, draft))]
    pub async fn create_group(&self, creator_id: i64, draft: GroupDraft) -> ChatResult<GroupDetails> {
        let name = draft.name.trim().to_string();
        if name.is_empty() {
            return Err(ChatError::validation("Group name is required"));
        }
        let max_members = draft.max_members.unwrap_or(DEFAULT_MAX_MEMBERS);
        if !(MIN_GROUP_CAPACITY..=MAX_GROUP_CAPACITY).contains(&max_members) {
            return Err(ChatError::validation(format!(
                "Max members must be between {MIN_GROUP_CAPACITY} and {MAX_GROUP_CAPACITY}"
            )));
        }

        let mut initial: Vec<i64> = Vec::new();
        for user_id in draft.initial_members {
            if user_id > 0 && user_id != creator_id && !initial.contains(&user_id) {
                initial.push(user_id);
            }
        }
        if initial.len() as u32 + 1 > max_members {
            return Err(ChatError::validation(format!(
                "Initial members exceed the group limit of {max_members}"
            )));
        }

        let group = self
            .groups
            .create_group(
                NewGroup {
                    name,
                    description: draft.description,
                    max_members,
                    is_public: draft.is_public,
                    require_approval: draft.require_approval,
                    created_by: creator_id,
                },
                default_permissions(),
            )
            .await
            .into_storage()?;

        if !initial.is_empty() {
            let outcome = self
                .groups
                .add_members_if_capacity(group.id, &initial, GroupRole::Member)
                .await
                .into_storage()?;
            if let AddMembersOutcome::CapacityExceeded { current, max } = outcome {
                warn!(group_id = group.id, current, max, "initial members rejected by capacity");
            }
        }

        let members = self.groups.members(group.id).await.into_storage()?;
        for member in &members {
            self.notifier.join_group_room(member.user_id, group.id).await;
        }
        info!(group_id = group.id, creator_id, members = members.len(), "group created");
        Ok(GroupDetails::new(group, members))
    }

    /// 群组详情，仅成员可见
    pub async fn group_info(&self, group_id: i64, requester_id: i64) -> ChatResult<GroupDetails> {
        let group = self.find_group(group_id).await?;
        self.permissions.require_member(group_id, requester_id).await?;
        let members = self.groups.members(group_id).await.into_storage()?;
        Ok(GroupDetails::new(group, members))
    }

    /// 用户所在的全部群组
    pub async fn user_groups(&self, user_id: i64) -> ChatResult<Vec<Conversation>> {
        let ids = self.groups.groups_of_user(user_id).await.into_storage()?;
        let mut groups = Vec::with_capacity(ids.len());
        for group_id in ids {
            if let Some(group) = self.groups.find_group(group_id).await.into_storage()? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// 批量加人：需要 add_members 权限，人数不得超过上限；已是成员的用户跳过
    #[instrument(skip(self, user_ids), fields(count = user_ids.len()))]
    pub async fn add_members(
        &self,
        group_id: i64,
        actor_id: i64,
        user_ids: &[i64],
    ) -> ChatResult<Vec<Participant>> {
        let _guard = self.locks.lock(group_id).await;
        self.permissions
            .require(
                group_id,
                actor_id,
                PermissionType::AddMembers,
                "Insufficient permissions to add members",
            )
            .await?;
        self.find_group(group_id).await?;

        let candidates: Vec<i64> = user_ids.iter().copied().filter(|id| *id > 0).collect();
        let outcome = self
            .groups
            .add_members_if_capacity(group_id, &candidates, GroupRole::Member)
            .await
            .into_storage()?;
        let added = match outcome {
            AddMembersOutcome::Added(added) => added,
            AddMembersOutcome::CapacityExceeded { max, .. } => {
                return Err(ChatError::denied(
                    ErrorCode::CapacityExceeded,
                    format!("Adding these members would exceed the group limit of {max}"),
                ));
            }
        };

        for member in &added {
            self.announce_member_added(group_id, member, Some(actor_id)).await;
        }
        info!(group_id, actor_id, added = added.len(), "members added");
        Ok(added)
    }

    /// 移除成员：本人或拥有 remove_members 权限者
    #[instrument(skip(self))]
    pub async fn remove_member(&self, group_id: i64, actor_id: i64, target_id: i64) -> ChatResult<()> {
        let _guard = self.locks.lock(group_id).await;
        if actor_id == target_id {
            self.permissions.require_member(group_id, actor_id).await?;
        } else {
            self.permissions
                .require(
                    group_id,
                    actor_id,
                    PermissionType::RemoveMembers,
                    "Insufficient permissions to remove members",
                )
                .await?;
        }

        let target_role = self
            .groups
            .member_role(group_id, target_id)
            .await
            .into_storage()?
            .ok_or_else(|| {
                ChatError::not_found("Target user is not a member of this group")
            })?;
        if target_role == GroupRole::Admin && self.is_last_admin_with_others(group_id).await? {
            return Err(ChatError::denied(
                ErrorCode::LastAdmin,
                "Cannot remove the last admin from the group",
            ));
        }

        let reason = if actor_id == target_id { "left" } else { "removed" };
        self.drop_member(group_id, target_id, reason).await?;
        info!(group_id, actor_id, target_id, reason, "member removed");
        Ok(())
    }

    /// 主动退群；最后一个管理员在仍有其他成员时不能退出
    #[instrument(skip(self))]
    pub async fn leave_group(&self, group_id: i64, user_id: i64) -> ChatResult<()> {
        let _guard = self.locks.lock(group_id).await;
        let role = self.permissions.require_member(group_id, user_id).await?;
        if role == GroupRole::Admin && self.is_last_admin_with_others(group_id).await? {
            return Err(ChatError::denied(
                ErrorCode::LastAdmin,
                "You are the last admin. Please promote another member to admin before leaving",
            ));
        }

        self.drop_member(group_id, user_id, "left").await?;
        info!(group_id, user_id, "member left group");
        Ok(())
    }

    /// 变更成员角色（提升或降级），需要 promote_members 权限
    #[instrument(skip(self))]
    pub async fn change_role(
        &self,
        group_id: i64,
        actor_id: i64,
        target_id: i64,
        role: GroupRole,
    ) -> ChatResult<()> {
        let _guard = self.locks.lock(group_id).await;
        self.permissions
            .require(
                group_id,
                actor_id,
                PermissionType::PromoteMembers,
                "Insufficient permissions to promote members",
            )
            .await?;

        let current = self
            .groups
            .member_role(group_id, target_id)
            .await
            .into_storage()?
            .ok_or_else(|| {
                ChatError::not_found("Target user is not a member of this group")
            })?;
        if current == GroupRole::Admin && role != GroupRole::Admin {
            let admins = self.groups.admin_count(group_id).await.into_storage()?;
            if admins <= 1 {
                return Err(ChatError::denied(
                    ErrorCode::LastAdmin,
                    "Cannot demote the last admin of the group",
                ));
            }
        }

        let updated = self
            .groups
            .update_role(group_id, target_id, role)
            .await
            .into_storage()?;
        if !updated {
            return Err(ChatError::not_found("Target user is not a member of this group"));
        }

        self.notifier.notify_group(
            PushEvent::GroupMemberPromoted,
            group_id,
            json!({
                "group_id": group_id,
                "user_id": target_id,
                "role": role,
                "previous_role": current,
                "changed_by": actor_id,
            }),
        );
        info!(group_id, actor_id, target_id, role = %role, "member role changed");
        Ok(())
    }

    /// 获取邀请链接，没有则生成
    pub async fn invite_link(&self, group_id: i64, actor_id: i64) -> ChatResult<String> {
        self.permissions
            .require(
                group_id,
                actor_id,
                PermissionType::ManageInvites,
                "Insufficient permissions to manage invites",
            )
            .await?;
        let group = self.find_group(group_id).await?;
        match group.invite_link {
            Some(code) => Ok(code),
            None => self.rotate_invite_code(group_id, actor_id).await,
        }
    }

    /// 重新生成邀请链接，旧链接立即失效
    pub async fn regenerate_invite_link(&self, group_id: i64, actor_id: i64) -> ChatResult<String> {
        self.permissions
            .require(
                group_id,
                actor_id,
                PermissionType::ManageInvites,
                "Insufficient permissions to manage invites",
            )
            .await?;
        self.find_group(group_id).await?;
        self.rotate_invite_code(group_id, actor_id).await
    }

    async fn rotate_invite_code(&self, group_id: i64, actor_id: i64) -> ChatResult<String> {
        for _ in 0..INVITE_CODE_ATTEMPTS {
            let code = generate_invite_code();
            if self
                .groups
                .set_invite_code(group_id, &code)
                .await
                .into_storage()?
            {
                self.notifier.notify_group(
                    PushEvent::GroupInviteLinkGenerated,
                    group_id,
                    json!({ "group_id": group_id, "invite_link": code, "generated_by": actor_id }),
                );
                info!(group_id, actor_id, "invite link generated");
                return Ok(code);
            }
        }
        Err(ChatError::Other(anyhow!(
            "failed to allocate a unique invite code after {INVITE_CODE_ATTEMPTS} attempts"
        )))
    }

    /// 通过邀请码入群：需要审批的群创建申请，否则直接加入
    #[instrument(skip(self, code))]
    pub async fn join_via_invite(&self, code: &str, user_id: i64) -> ChatResult<InviteJoinOutcome> {
        let group = self
            .groups
            .find_by_invite_code(code.trim())
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::not_found("Invalid or expired invite link"))?;

        if group.require_approval {
            let request = self.submit_join_request(&group, user_id, None).await?;
            return Ok(InviteJoinOutcome::Pending(request));
        }

        let _guard = self.locks.lock(group.id).await;
        self.ensure_not_member(group.id, user_id).await?;
        let member = self.admit(group.id, user_id, None).await?;
        info!(group_id = group.id, user_id, "user joined group via invite");
        Ok(InviteJoinOutcome::Joined {
            group_id: group.id,
            member,
        })
    }

    /// 直接提交入群申请
    pub async fn request_to_join(
        &self,
        group_id: i64,
        user_id: i64,
        message: Option<String>,
    ) -> ChatResult<JoinRequest> {
        let group = self.find_group(group_id).await?;
        self.submit_join_request(&group, user_id, message).await
    }

    async fn submit_join_request(
        &self,
        group: &Conversation,
        user_id: i64,
        message: Option<String>,
    ) -> ChatResult<JoinRequest> {
        self.ensure_not_member(group.id, user_id).await?;
        let count = self.groups.member_count(group.id).await.into_storage()?;
        if count >= group.max_members {
            return Err(ChatError::denied(
                ErrorCode::CapacityExceeded,
                "Cannot join group (group is full)",
            ));
        }

        let request = self
            .requests
            .create_join_request(group.id, user_id, message)
            .await
            .into_storage()?
            .ok_or_else(|| {
                ChatError::conflict("You already have a pending join request for this group")
            })?;

        self.notifier.notify_group(
            PushEvent::GroupJoinRequest,
            group.id,
            json!({ "group_id": group.id, "request": request }),
        );
        info!(group_id = group.id, user_id, request_id = request.id, "join request created");
        Ok(request)
    }

    /// 待处理的入群申请，需要 manage_requests 权限
    pub async fn pending_requests(&self, group_id: i64, actor_id: i64) -> ChatResult<Vec<JoinRequest>> {
        self.permissions
            .require(
                group_id,
                actor_id,
                PermissionType::ManageRequests,
                "Insufficient permissions to view join requests",
            )
            .await?;
        self.requests.pending_requests(group_id).await.into_storage()
    }

    /// 审批入群申请；通过时受人数上限约束
    #[instrument(skip(self, reason))]
    pub async fn review_join_request(
        &self,
        group_id: i64,
        actor_id: i64,
        request_id: i64,
        decision: JoinDecision,
        reason: Option<String>,
    ) -> ChatResult<JoinRequest> {
        let _guard = self.locks.lock(group_id).await;
        self.permissions
            .require(
                group_id,
                actor_id,
                PermissionType::ManageRequests,
                "Insufficient permissions to handle join requests",
            )
            .await?;

        let request = self
            .requests
            .find_join_request(request_id)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::not_found("Join request not found"))?;
        if request.conversation_id != group_id {
            return Err(ChatError::validation("Join request does not belong to this group"));
        }
        if request.status != JoinRequestStatus::Pending {
            return Err(ChatError::conflict(format!(
                "Join request has already been {}",
                request.status.as_str()
            )));
        }

        let status = match decision {
            JoinDecision::Approve => {
                if self
                    .groups
                    .member_role(group_id, request.user_id)
                    .await
                    .into_storage()?
                    .is_some()
                {
                    return Err(ChatError::conflict("User is already a member of the group"));
                }
                let count = self.groups.member_count(group_id).await.into_storage()?;
                let group = self.find_group(group_id).await?;
                if count >= group.max_members {
                    return Err(ChatError::denied(
                        ErrorCode::CapacityExceeded,
                        "User cannot join group (group is full)",
                    ));
                }
                JoinRequestStatus::Approved
            }
            JoinDecision::Reject => JoinRequestStatus::Rejected,
        };

        // 先入群再结案：入群失败时申请保持 pending，可再次审批
        if decision == JoinDecision::Approve {
            self.admit(group_id, request.user_id, Some(actor_id)).await?;
        }

        let resolved = self
            .requests
            .resolve_join_request(request_id, status, actor_id, Utc::now())
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::conflict("Join request has already been handled"))?;

        self.notifier.notify_group(
            PushEvent::GroupJoinRequestHandled,
            group_id,
            json!({
                "group_id": group_id,
                "request_id": request_id,
                "action": decision.as_str(),
                "reason": reason,
            }),
        );
        self.notifier.notify_user(
            PushEvent::GroupJoinRequestHandled,
            resolved.user_id,
            json!({
                "group_id": group_id,
                "request_id": request_id,
                "action": decision.as_str(),
                "reason": reason,
            }),
        );
        info!(group_id, actor_id, request_id, action = decision.as_str(), "join request handled");
        Ok(resolved)
    }

    async fn find_group(&self, group_id: i64) -> ChatResult<Conversation> {
        self.groups
            .find_group(group_id)
            .await
            .into_storage()?
            .ok_or_else(|| ChatError::not_found("Group not found"))
    }

    async fn ensure_not_member(&self, group_id: i64, user_id: i64) -> ChatResult<()> {
        if self
            .groups
            .member_role(group_id, user_id)
            .await
            .into_storage()?
            .is_some()
        {
            return Err(ChatError::conflict("You are already a member of this group"));
        }
        Ok(())
    }

    /// 加入单个成员，受人数上限约束
    async fn admit(&self, group_id: i64, user_id: i64, added_by: Option<i64>) -> ChatResult<Participant> {
        let outcome = self
            .groups
            .add_members_if_capacity(group_id, &[user_id], GroupRole::Member)
            .await
            .into_storage()?;
        match outcome {
            AddMembersOutcome::Added(mut added) => {
                let member = added.pop().ok_or_else(|| {
                    ChatError::conflict("You are already a member of this group")
                })?;
                self.announce_member_added(group_id, &member, added_by).await;
                Ok(member)
            }
            AddMembersOutcome::CapacityExceeded { max, .. } => Err(ChatError::denied(
                ErrorCode::CapacityExceeded,
                format!("Group has reached its limit of {max} members"),
            )),
        }
    }

    /// 先同步房间再广播，新成员自己也能收到事件
    async fn announce_member_added(&self, group_id: i64, member: &Participant, added_by: Option<i64>) {
        self.notifier.join_group_room(member.user_id, group_id).await;
        self.notifier.notify_group(
            PushEvent::GroupMemberAdded,
            group_id,
            json!({ "group_id": group_id, "member": member, "added_by": added_by }),
        );
    }

    /// 删除成员，移出房间后通知群内与本人
    async fn drop_member(&self, group_id: i64, user_id: i64, reason: &str) -> ChatResult<()> {
        let removed = self
            .groups
            .remove_member(group_id, user_id)
            .await
            .into_storage()?;
        if !removed {
            return Err(not_a_member());
        }

        self.notifier.leave_group_room(user_id, group_id).await;
        let payload = json!({ "group_id": group_id, "user_id": user_id, "reason": reason });
        self.notifier
            .notify_group(PushEvent::GroupMemberRemoved, group_id, payload.clone());
        self.notifier
            .notify_user(PushEvent::GroupMemberRemoved, user_id, payload);
        Ok(())
    }

    async fn is_last_admin_with_others(&self, group_id: i64) -> ChatResult<bool> {
        let admins = self.groups.admin_count(group_id).await.into_storage()?;
        let members = self.groups.member_count(group_id).await.into_storage()?;
        Ok(admins <= 1 && members > 1)
    }
}
