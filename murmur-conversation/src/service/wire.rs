//! 依赖装配：按依赖顺序构建权限判定、领域服务与命令/查询处理器

use std::sync::Arc;

use murmur_push::ChatNotifier;
use murmur_storage_model::{
    GroupRepository, JoinRequestRepository, MessageRepository, ReactionRepository,
};

use crate::application::{GroupCommandHandler, GroupQueryHandler};
use crate::domain::service::{GroupDomainService, PermissionResolver, ReactionService};

pub struct ConversationComponents {
    pub commands: Arc<GroupCommandHandler>,
    pub queries: Arc<GroupQueryHandler>,
    pub permissions: Arc<PermissionResolver>,
}

/// `store` 同时提供群组、入群申请、消息与反应仓储
pub fn initialize<S>(store: Arc<S>, notifier: ChatNotifier) -> ConversationComponents
where
    S: GroupRepository + JoinRequestRepository + MessageRepository + ReactionRepository + 'static,
{
    let permissions = Arc::new(PermissionResolver::new(store.clone()));
    let groups = Arc::new(GroupDomainService::new(
        store.clone(),
        store.clone(),
        permissions.clone(),
        notifier.clone(),
    ));
    let reactions = Arc::new(ReactionService::new(store.clone(), store, notifier));

    ConversationComponents {
        commands: Arc::new(GroupCommandHandler::new(
            groups.clone(),
            permissions.clone(),
            reactions,
        )),
        queries: Arc::new(GroupQueryHandler::new(groups, permissions.clone())),
        permissions,
    }
}
