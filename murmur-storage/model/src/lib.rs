//! Murmur 存储模型
//!
//! 实体、推送视图、代理信封以及仓储接口。

pub mod call;
pub mod group;
pub mod message;
pub mod repository;
pub mod view;
pub mod wire;

use thiserror::Error;

pub use call::{
    CallParticipant, CallStatus, CallType, ConnectionQuality, GroupCall, JoinOutcome,
    LeaveOutcome, MediaType, NewCallParticipant,
};
pub use group::{
    AddMembersOutcome, Conversation, DEFAULT_MAX_MEMBERS, GroupPermission, GroupRole,
    JoinRequest, JoinRequestStatus, NewGroup, Participant, PermissionType, default_permissions,
};
pub use message::{
    Attachment, Message, MessageStatus, MessageType, NewAttachment, NewMessage, PersistOutcome,
    Reaction,
};
pub use repository::{
    CallRepository, GroupRepository, JoinRequestRepository, MessageRepository,
    ReactionRepository,
};
pub use view::{CallParticipantView, GroupCallView, MessageView};
pub use wire::OutboundMessage;

/// 枚举文本解析失败
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {value}")]
pub struct ParseEnumError {
    pub field: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}
