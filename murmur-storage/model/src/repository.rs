//! 仓储接口定义（Port）
//!
//! 适配器返回 `anyhow::Result`，由服务层映射为业务错误。
//! 需要原子性的操作（容量检查 + 插入、状态比较并设置）直接体现在接口上，
//! 不依赖调用方先查后写。

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::call::{
    CallParticipant, ConnectionQuality, GroupCall, JoinOutcome, LeaveOutcome, MediaType,
    NewCallParticipant,
};
use crate::group::{
    AddMembersOutcome, Conversation, GroupPermission, GroupRole, JoinRequest, JoinRequestStatus,
    NewGroup, Participant, PermissionType,
};
use crate::message::{Attachment, Message, NewAttachment, NewMessage, PersistOutcome, Reaction};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 在同一事务内写入消息及其附件；幂等键已存在时返回已存消息
    async fn insert_with_attachments(
        &self,
        message: NewMessage,
        attachments: Vec<NewAttachment>,
    ) -> Result<PersistOutcome>;

    async fn find_by_id(&self, message_id: i64) -> Result<Option<Message>>;

    async fn find_by_client_id(&self, client_message_id: Uuid) -> Result<Option<Message>>;

    async fn attachments_of(&self, message_id: i64) -> Result<Vec<Attachment>>;
}

#[async_trait]
pub trait ReactionRepository: Send + Sync {
    /// 插入反应；(message_id, user_id, emoji) 已存在时返回 None
    async fn insert_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Option<Reaction>>;

    /// 删除反应；不存在时返回 false
    async fn delete_reaction(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<bool>;

    async fn reactions_of(&self, message_id: i64) -> Result<Vec<Reaction>>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// 创建群组，创建者成为管理员，并写入权限配置
    async fn create_group(
        &self,
        group: NewGroup,
        permissions: Vec<(PermissionType, GroupRole)>,
    ) -> Result<Conversation>;

    async fn find_group(&self, group_id: i64) -> Result<Option<Conversation>>;

    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Conversation>>;

    /// 设置邀请码；邀请码已被其他群占用时返回 false
    async fn set_invite_code(&self, group_id: i64, code: &str) -> Result<bool>;

    async fn member_role(&self, group_id: i64, user_id: i64) -> Result<Option<GroupRole>>;

    async fn members(&self, group_id: i64) -> Result<Vec<Participant>>;

    async fn member_count(&self, group_id: i64) -> Result<u32>;

    async fn admin_count(&self, group_id: i64) -> Result<u32>;

    /// 检查容量并批量加人（原子）
    async fn add_members_if_capacity(
        &self,
        group_id: i64,
        user_ids: &[i64],
        role: GroupRole,
    ) -> Result<AddMembersOutcome>;

    /// 删除成员；不是成员时返回 false
    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<bool>;

    /// 更新角色；不是成员时返回 false
    async fn update_role(&self, group_id: i64, user_id: i64, role: GroupRole) -> Result<bool>;

    /// 用户所在的全部群组
    async fn groups_of_user(&self, user_id: i64) -> Result<Vec<i64>>;

    async fn permission(
        &self,
        group_id: i64,
        permission: PermissionType,
    ) -> Result<Option<GroupPermission>>;

    async fn permissions(&self, group_id: i64) -> Result<Vec<GroupPermission>>;

    /// 整体替换群的权限配置
    async fn replace_permissions(
        &self,
        group_id: i64,
        permissions: Vec<(PermissionType, GroupRole)>,
    ) -> Result<()>;
}

#[async_trait]
pub trait JoinRequestRepository: Send + Sync {
    /// 创建申请；同一用户已有 pending 申请时返回 None
    async fn create_join_request(
        &self,
        group_id: i64,
        user_id: i64,
        message: Option<String>,
    ) -> Result<Option<JoinRequest>>;

    async fn find_join_request(&self, request_id: i64) -> Result<Option<JoinRequest>>;

    async fn pending_requests(&self, group_id: i64) -> Result<Vec<JoinRequest>>;

    /// 仅当申请仍为 pending 时写入结果
    async fn resolve_join_request(
        &self,
        request_id: i64,
        status: JoinRequestStatus,
        reviewed_by: i64,
        reviewed_at: DateTime<Utc>,
    ) -> Result<Option<JoinRequest>>;
}

#[async_trait]
pub trait CallRepository: Send + Sync {
    /// 创建通话并写入发起人参与记录；群内已有 Active 通话时返回 None
    async fn insert_call(
        &self,
        call: &GroupCall,
        initiator: NewCallParticipant,
    ) -> Result<Option<CallParticipant>>;

    async fn find_call(&self, call_id: &str) -> Result<Option<GroupCall>>;

    async fn active_call_for_group(&self, group_id: i64) -> Result<Option<GroupCall>>;

    /// 检查状态、重复与容量后插入参与记录（原子）
    async fn join_call(&self, participant: NewCallParticipant) -> Result<JoinOutcome>;

    /// 关闭用户的在线参与记录；不在通话中时返回 None
    async fn leave_call(
        &self,
        call_id: &str,
        user_id: i64,
        left_at: DateTime<Utc>,
    ) -> Result<Option<LeaveOutcome>>;

    /// Active → Ended 比较并设置，同时关闭所有在线参与记录；
    /// 返回被关闭记录的用户，通话已结束时返回 None
    async fn end_call_if_active(
        &self,
        call_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Vec<i64>>>;

    async fn open_participant(&self, call_id: &str, user_id: i64)
    -> Result<Option<CallParticipant>>;

    async fn participants(&self, call_id: &str, active_only: bool) -> Result<Vec<CallParticipant>>;

    /// 更新媒体开关；用户不在通话中时返回 None
    async fn update_media(
        &self,
        call_id: &str,
        user_id: i64,
        media: MediaType,
        enabled: bool,
    ) -> Result<Option<CallParticipant>>;

    /// 更新连接质量；用户不在通话中时返回 None
    async fn update_quality(
        &self,
        call_id: &str,
        user_id: i64,
        quality: ConnectionQuality,
    ) -> Result<Option<CallParticipant>>;

    /// 群的历史通话（按开始时间倒序）
    async fn call_history(&self, group_id: i64, offset: u32, limit: u32) -> Result<Vec<GroupCall>>;
}
