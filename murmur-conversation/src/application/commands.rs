use murmur_storage_model::{GroupRole, PermissionType};
use serde::Deserialize;

use crate::domain::model::JoinDecision;

/// 创建群组命令
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupCommand {
    pub creator_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub max_members: Option<u32>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub initial_members: Vec<i64>,
}

/// 批量加人命令
#[derive(Debug, Clone, Deserialize)]
pub struct AddMembersCommand {
    pub group_id: i64,
    pub actor_id: i64,
    pub user_ids: Vec<i64>,
}

/// 移除成员命令
#[derive(Debug, Clone, Deserialize)]
pub struct RemoveMemberCommand {
    pub group_id: i64,
    pub actor_id: i64,
    pub target_id: i64,
}

/// 变更角色命令
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRoleCommand {
    pub group_id: i64,
    pub actor_id: i64,
    pub target_id: i64,
    pub role: GroupRole,
}

/// 更新权限配置命令
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePermissionsCommand {
    pub group_id: i64,
    pub actor_id: i64,
    pub permissions: Vec<(PermissionType, GroupRole)>,
}

/// 审批入群申请命令
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewJoinRequestCommand {
    pub group_id: i64,
    pub actor_id: i64,
    pub request_id: i64,
    pub decision: JoinDecision,
    #[serde(default)]
    pub reason: Option<String>,
}

/// 表情反应命令
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionCommand {
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
}
