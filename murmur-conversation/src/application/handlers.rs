use std::sync::Arc;

use murmur_im_core::ChatResult;
use murmur_storage_model::{JoinRequest, Participant, PermissionType, Reaction};
use tracing::debug;

use crate::application::commands::{
    AddMembersCommand, ChangeRoleCommand, CreateGroupCommand, ReactionCommand,
    RemoveMemberCommand, ReviewJoinRequestCommand, UpdatePermissionsCommand,
};
use crate::domain::model::{GroupDetails, InviteJoinOutcome};
use crate::domain::service::{GroupDomainService, GroupDraft, PermissionResolver, ReactionService};

/// 群组命令处理器
pub struct GroupCommandHandler {
    groups: Arc<GroupDomainService>,
    permissions: Arc<PermissionResolver>,
    reactions: Arc<ReactionService>,
}

impl GroupCommandHandler {
    pub fn new(
        groups: Arc<GroupDomainService>,
        permissions: Arc<PermissionResolver>,
        reactions: Arc<ReactionService>,
    ) -> Self {
        Self {
            groups,
            permissions,
            reactions,
        }
    }

    /// 处理创建群组命令
    pub async fn handle_create_group(&self, command: CreateGroupCommand) -> ChatResult<GroupDetails> {
        debug!(
            creator_id = command.creator_id,
            initial_members = command.initial_members.len(),
            "Handling create group command"
        );
        let draft = GroupDraft {
            name: command.name,
            description: command.description,
            max_members: command.max_members,
            is_public: command.is_public,
            require_approval: command.require_approval,
            initial_members: command.initial_members,
        };
        self.groups.create_group(command.creator_id, draft).await
    }

    /// 处理批量加人命令
    pub async fn handle_add_members(&self, command: AddMembersCommand) -> ChatResult<Vec<Participant>> {
        debug!(group_id = command.group_id, count = command.user_ids.len(), "Handling add members command");
        self.groups
            .add_members(command.group_id, command.actor_id, &command.user_ids)
            .await
    }

    /// 处理移除成员命令
    pub async fn handle_remove_member(&self, command: RemoveMemberCommand) -> ChatResult<()> {
        debug!(group_id = command.group_id, target_id = command.target_id, "Handling remove member command");
        self.groups
            .remove_member(command.group_id, command.actor_id, command.target_id)
            .await
    }

    pub async fn handle_leave_group(&self, group_id: i64, user_id: i64) -> ChatResult<()> {
        self.groups.leave_group(group_id, user_id).await
    }

    /// 处理角色变更命令
    pub async fn handle_change_role(&self, command: ChangeRoleCommand) -> ChatResult<()> {
        debug!(
            group_id = command.group_id,
            target_id = command.target_id,
            role = %command.role,
            "Handling change role command"
        );
        self.groups
            .change_role(command.group_id, command.actor_id, command.target_id, command.role)
            .await
    }

    /// 处理权限配置更新命令
    pub async fn handle_update_permissions(&self, command: UpdatePermissionsCommand) -> ChatResult<()> {
        self.permissions
            .update_group_permissions(command.group_id, command.actor_id, command.permissions)
            .await
    }

    pub async fn handle_get_invite_link(&self, group_id: i64, actor_id: i64) -> ChatResult<String> {
        self.groups.invite_link(group_id, actor_id).await
    }

    pub async fn handle_regenerate_invite_link(&self, group_id: i64, actor_id: i64) -> ChatResult<String> {
        self.groups.regenerate_invite_link(group_id, actor_id).await
    }

    pub async fn handle_join_via_invite(&self, code: &str, user_id: i64) -> ChatResult<InviteJoinOutcome> {
        self.groups.join_via_invite(code, user_id).await
    }

    pub async fn handle_request_to_join(
        &self,
        group_id: i64,
        user_id: i64,
        message: Option<String>,
    ) -> ChatResult<JoinRequest> {
        self.groups.request_to_join(group_id, user_id, message).await
    }

    /// 处理入群申请审批命令
    pub async fn handle_review_join_request(&self, command: ReviewJoinRequestCommand) -> ChatResult<JoinRequest> {
        debug!(
            group_id = command.group_id,
            request_id = command.request_id,
            decision = command.decision.as_str(),
            "Handling review join request command"
        );
        self.groups
            .review_join_request(
                command.group_id,
                command.actor_id,
                command.request_id,
                command.decision,
                command.reason,
            )
            .await
    }

    pub async fn handle_add_reaction(&self, command: ReactionCommand) -> ChatResult<Reaction> {
        self.reactions
            .add_reaction(command.message_id, command.user_id, &command.emoji)
            .await
    }

    pub async fn handle_remove_reaction(&self, command: ReactionCommand) -> ChatResult<()> {
        self.reactions
            .remove_reaction(command.message_id, command.user_id, &command.emoji)
            .await
    }
}

/// 群组查询处理器
pub struct GroupQueryHandler {
    groups: Arc<GroupDomainService>,
    permissions: Arc<PermissionResolver>,
}

impl GroupQueryHandler {
    pub fn new(groups: Arc<GroupDomainService>, permissions: Arc<PermissionResolver>) -> Self {
        Self { groups, permissions }
    }

    pub async fn group_info(&self, group_id: i64, requester_id: i64) -> ChatResult<GroupDetails> {
        self.groups.group_info(group_id, requester_id).await
    }

    pub async fn user_groups(&self, user_id: i64) -> ChatResult<Vec<murmur_storage_model::Conversation>> {
        self.groups.user_groups(user_id).await
    }

    pub async fn pending_requests(&self, group_id: i64, actor_id: i64) -> ChatResult<Vec<JoinRequest>> {
        self.groups.pending_requests(group_id, actor_id).await
    }

    pub async fn has_permission(
        &self,
        group_id: i64,
        user_id: i64,
        permission: PermissionType,
    ) -> ChatResult<bool> {
        self.permissions.has_permission(group_id, user_id, permission).await
    }

    pub async fn user_permissions(&self, group_id: i64, user_id: i64) -> ChatResult<Vec<PermissionType>> {
        self.permissions.get_user_permissions(group_id, user_id).await
    }
}
