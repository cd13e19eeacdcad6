//! Murmur 群组服务
//!
//! 权限判定、成员管理（容量与最后管理员保护）、邀请链接、入群申请与表情反应。

pub mod application;
pub mod domain;
pub mod service;

pub use application::{GroupCommandHandler, GroupQueryHandler};
pub use domain::{
    GroupDetails, GroupDomainService, GroupDraft, InviteJoinOutcome, JoinDecision,
    PermissionResolver, ReactionService,
};
pub use service::wire::ConversationComponents;
