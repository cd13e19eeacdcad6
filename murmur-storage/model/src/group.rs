//! 群组、成员、入群申请与权限配置

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

/// 默认群成员上限
pub const DEFAULT_MAX_MEMBERS: u32 = 256;

/// 群角色：admin ⊇ moderator ⊇ member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Member,
    Moderator,
    Admin,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Member => "member",
            GroupRole::Moderator => "moderator",
            GroupRole::Admin => "admin",
        }
    }

    /// 当前角色是否满足所需角色
    pub fn satisfies(&self, required: GroupRole) -> bool {
        *self >= required
    }
}

impl fmt::Display for GroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(GroupRole::Member),
            "moderator" => Ok(GroupRole::Moderator),
            "admin" => Ok(GroupRole::Admin),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

/// 受权限表控制的群操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    EditInfo,
    AddMembers,
    RemoveMembers,
    PromoteMembers,
    ManageInvites,
    ManageRequests,
    DeleteMessages,
    PinMessages,
}

impl PermissionType {
    pub const ALL: [PermissionType; 8] = [
        PermissionType::EditInfo,
        PermissionType::AddMembers,
        PermissionType::RemoveMembers,
        PermissionType::PromoteMembers,
        PermissionType::ManageInvites,
        PermissionType::ManageRequests,
        PermissionType::DeleteMessages,
        PermissionType::PinMessages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::EditInfo => "edit_info",
            PermissionType::AddMembers => "add_members",
            PermissionType::RemoveMembers => "remove_members",
            PermissionType::PromoteMembers => "promote_members",
            PermissionType::ManageInvites => "manage_invites",
            PermissionType::ManageRequests => "manage_requests",
            PermissionType::DeleteMessages => "delete_messages",
            PermissionType::PinMessages => "pin_messages",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionType::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("permission_type", s))
    }
}

/// 会话 / 群组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_members: u32,
    pub is_public: bool,
    pub require_approval: bool,
    /// 邀请码（唯一）
    pub invite_link: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// 创建群组参数
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub max_members: u32,
    pub is_public: bool,
    pub require_approval: bool,
    pub created_by: i64,
}

/// 群成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: i64,
    pub user_id: i64,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

/// 权限配置：执行某操作所需的最低角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermission {
    pub conversation_id: i64,
    pub permission_type: PermissionType,
    pub required_role: GroupRole,
}

/// 新群默认权限配置
pub fn default_permissions() -> Vec<(PermissionType, GroupRole)> {
    vec![
        (PermissionType::EditInfo, GroupRole::Moderator),
        (PermissionType::AddMembers, GroupRole::Moderator),
        (PermissionType::RemoveMembers, GroupRole::Moderator),
        (PermissionType::PromoteMembers, GroupRole::Admin),
        (PermissionType::ManageInvites, GroupRole::Moderator),
        (PermissionType::ManageRequests, GroupRole::Moderator),
        (PermissionType::DeleteMessages, GroupRole::Moderator),
        (PermissionType::PinMessages, GroupRole::Moderator),
    ]
}

/// 入群申请状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl JoinRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinRequestStatus::Pending => "pending",
            JoinRequestStatus::Approved => "approved",
            JoinRequestStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for JoinRequestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JoinRequestStatus::Pending),
            "approved" => Ok(JoinRequestStatus::Approved),
            "rejected" => Ok(JoinRequestStatus::Rejected),
            _ => Err(ParseEnumError::new("join_request_status", s)),
        }
    }
}

/// 入群申请；reviewed_by / reviewed_at 仅在离开 pending 时写入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: i64,
    pub conversation_id: i64,
    pub user_id: i64,
    pub message: Option<String>,
    pub status: JoinRequestStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// 批量加人结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddMembersOutcome {
    /// 新加入的成员（已是成员的用户被跳过）
    Added(Vec<Participant>),
    /// 超出群上限，未做任何修改
    CapacityExceeded { current: u32, max: u32 },
}
