//! 推送领域模型：事件类型、推送帧、推送目标与房间命名

use std::fmt;

use murmur_im_core::Audience;
use serde::Serialize;
use serde_json::Value;

const GROUP_ROOM_PREFIX: &str = "Group_";
const CALL_ROOM_PREFIX: &str = "Call_";

/// 推送到客户端的事件名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PushEvent {
    ReceiveMessage,
    ReceiveGroupMessage,
    ReceiveReaction,
    RemoveReaction,
    UserJoinedGroup,
    UserLeftGroup,
    GroupMemberAdded,
    GroupMemberRemoved,
    GroupMemberPromoted,
    GroupJoinRequest,
    GroupJoinRequestHandled,
    GroupInviteLinkGenerated,
    GroupCallStarted,
    GroupCallEnded,
    GroupCallParticipantJoined,
    GroupCallParticipantLeft,
    GroupCallMediaToggled,
    GroupCallConnectionQualityUpdated,
    ReceiveGroupCallOffer,
    ReceiveGroupCallAnswer,
    ReceiveGroupIceCandidate,
    ReceiveCallOffer,
    ReceiveCallAnswer,
    ReceiveIceCandidate,
    CallEnded,
}

impl PushEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushEvent::ReceiveMessage => "ReceiveMessage",
            PushEvent::ReceiveGroupMessage => "ReceiveGroupMessage",
            PushEvent::ReceiveReaction => "ReceiveReaction",
            PushEvent::RemoveReaction => "RemoveReaction",
            PushEvent::UserJoinedGroup => "UserJoinedGroup",
            PushEvent::UserLeftGroup => "UserLeftGroup",
            PushEvent::GroupMemberAdded => "GroupMemberAdded",
            PushEvent::GroupMemberRemoved => "GroupMemberRemoved",
            PushEvent::GroupMemberPromoted => "GroupMemberPromoted",
            PushEvent::GroupJoinRequest => "GroupJoinRequest",
            PushEvent::GroupJoinRequestHandled => "GroupJoinRequestHandled",
            PushEvent::GroupInviteLinkGenerated => "GroupInviteLinkGenerated",
            PushEvent::GroupCallStarted => "GroupCallStarted",
            PushEvent::GroupCallEnded => "GroupCallEnded",
            PushEvent::GroupCallParticipantJoined => "GroupCallParticipantJoined",
            PushEvent::GroupCallParticipantLeft => "GroupCallParticipantLeft",
            PushEvent::GroupCallMediaToggled => "GroupCallMediaToggled",
            PushEvent::GroupCallConnectionQualityUpdated => "GroupCallConnectionQualityUpdated",
            PushEvent::ReceiveGroupCallOffer => "ReceiveGroupCallOffer",
            PushEvent::ReceiveGroupCallAnswer => "ReceiveGroupCallAnswer",
            PushEvent::ReceiveGroupIceCandidate => "ReceiveGroupIceCandidate",
            PushEvent::ReceiveCallOffer => "ReceiveCallOffer",
            PushEvent::ReceiveCallAnswer => "ReceiveCallAnswer",
            PushEvent::ReceiveIceCandidate => "ReceiveIceCandidate",
            PushEvent::CallEnded => "CallEnded",
        }
    }
}

impl fmt::Display for PushEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 下发给单个连接的帧
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushFrame {
    pub event: PushEvent,
    pub payload: Value,
}

impl PushFrame {
    pub fn new(event: PushEvent, payload: Value) -> Self {
        Self { event, payload }
    }
}

/// 推送目标
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PushTarget {
    User(i64),
    Room(String),
    Everyone,
}

impl PushTarget {
    pub fn group(group_id: i64) -> Self {
        PushTarget::Room(group_room(group_id))
    }

    pub fn call(call_id: &str) -> Self {
        PushTarget::Room(call_room(call_id))
    }

    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            PushTarget::User(_) => "user",
            PushTarget::Room(_) => "room",
            PushTarget::Everyone => "all",
        }
    }
}

impl From<Audience> for PushTarget {
    fn from(audience: Audience) -> Self {
        match audience {
            Audience::User(user_id) => PushTarget::User(user_id),
            Audience::Group(group_id) => PushTarget::group(group_id),
            Audience::Everyone => PushTarget::Everyone,
        }
    }
}

/// 连接标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub fn group_room(group_id: i64) -> String {
    format!("{GROUP_ROOM_PREFIX}{group_id}")
}

pub fn call_room(call_id: &str) -> String {
    format!("{CALL_ROOM_PREFIX}{call_id}")
}

/// 从房间名解析群 ID；非群房间返回 None
pub fn parse_group_room(room: &str) -> Option<i64> {
    room.strip_prefix(GROUP_ROOM_PREFIX)?.parse().ok()
}
