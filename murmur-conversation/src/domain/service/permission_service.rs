//! 群权限判定
//!
//! 角色层级固定：admin ⊇ moderator ⊇ member。
//! admin 不查权限表，始终放行；其他角色按权限表判定，未配置的操作一律拒绝。

use std::sync::Arc;

use murmur_im_core::{ChatError, ChatResult, ErrorCode, StorageResultExt};
use murmur_storage_model::{GroupRepository, GroupRole, PermissionType};
use tracing::{debug, info};

/// 纯判定：调用方角色 + 该操作要求的角色
pub fn is_granted(role: Option<GroupRole>, required: Option<GroupRole>) -> bool {
    match (role, required) {
        (Some(GroupRole::Admin), _) => true,
        (Some(role), Some(required)) => role.satisfies(required),
        _ => false,
    }
}

pub struct PermissionResolver {
    groups: Arc<dyn GroupRepository>,
}

impl PermissionResolver {
    pub fn new(groups: Arc<dyn GroupRepository>) -> Self {
        Self { groups }
    }

    pub async fn has_permission(
        &self,
        group_id: i64,
        user_id: i64,
        permission: PermissionType,
    ) -> ChatResult<bool> {
        let role = self
            .groups
            .member_role(group_id, user_id)
            .await
            .into_storage()?;
        match role {
            None => return Ok(false),
            Some(GroupRole::Admin) => return Ok(true),
            Some(_) => {}
        }

        let rule = self
            .groups
            .permission(group_id, permission)
            .await
            .into_storage()?;
        let granted = is_granted(role, rule.map(|r| r.required_role));
        debug!(group_id, user_id, permission = %permission, granted, "permission resolved");
        Ok(granted)
    }

    /// 用户在群内拥有的全部权限
    pub async fn get_user_permissions(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> ChatResult<Vec<PermissionType>> {
        let Some(role) = self
            .groups
            .member_role(group_id, user_id)
            .await
            .into_storage()?
        else {
            return Ok(Vec::new());
        };
        if role == GroupRole::Admin {
            return Ok(PermissionType::ALL.to_vec());
        }

        let rules = self.groups.permissions(group_id).await.into_storage()?;
        Ok(rules
            .into_iter()
            .filter(|rule| role.satisfies(rule.required_role))
            .map(|rule| rule.permission_type)
            .collect())
    }

    /// 整体替换权限配置，仅管理员可操作
    pub async fn update_group_permissions(
        &self,
        group_id: i64,
        actor_id: i64,
        permissions: Vec<(PermissionType, GroupRole)>,
    ) -> ChatResult<()> {
        let role = self
            .groups
            .member_role(group_id, actor_id)
            .await
            .into_storage()?;
        match role {
            None => return Err(not_a_member()),
            Some(GroupRole::Admin) => {}
            Some(_) => {
                return Err(ChatError::permission_denied(
                    "Only admins can change group permissions",
                ));
            }
        }

        let count = permissions.len();
        self.groups
            .replace_permissions(group_id, permissions)
            .await
            .into_storage()?;
        info!(group_id, actor_id, count, "group permissions replaced");
        Ok(())
    }

    /// 校验成员身份并返回角色
    pub async fn require_member(&self, group_id: i64, user_id: i64) -> ChatResult<GroupRole> {
        self.groups
            .member_role(group_id, user_id)
            .await
            .into_storage()?
            .ok_or_else(not_a_member)
    }

    /// 校验成员身份与权限；`denial` 为权限不足时返回给调用方的原因
    pub async fn require(
        &self,
        group_id: i64,
        user_id: i64,
        permission: PermissionType,
        denial: &str,
    ) -> ChatResult<GroupRole> {
        let role = self.require_member(group_id, user_id).await?;
        if !self.has_permission(group_id, user_id, permission).await? {
            return Err(ChatError::denied(ErrorCode::PermissionDenied, denial));
        }
        Ok(role)
    }
}

pub(crate) fn not_a_member() -> ChatError {
    ChatError::permission_denied("You are not a member of this group")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_is_superuser() {
        assert!(is_granted(Some(GroupRole::Admin), None));
        assert!(is_granted(Some(GroupRole::Admin), Some(GroupRole::Admin)));
    }

    #[test]
    fn hierarchy_applies_to_configured_rules() {
        assert!(is_granted(Some(GroupRole::Moderator), Some(GroupRole::Member)));
        assert!(is_granted(Some(GroupRole::Moderator), Some(GroupRole::Moderator)));
        assert!(!is_granted(Some(GroupRole::Member), Some(GroupRole::Moderator)));
        assert!(!is_granted(Some(GroupRole::Moderator), Some(GroupRole::Admin)));
    }

    #[test]
    fn missing_rule_or_membership_is_denied() {
        assert!(!is_granted(Some(GroupRole::Moderator), None));
        assert!(!is_granted(None, Some(GroupRole::Member)));
    }
}
