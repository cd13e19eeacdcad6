//! Murmur 推送层
//!
//! 推送通道接口、内存推送中心、扇出通知与在线房间同步。

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{ChatNotifier, DEFAULT_FANOUT_QUEUE_CAPACITY, PresenceService};
pub use domain::{
    ConnectionId, PushChannel, PushEvent, PushFrame, PushTarget, call_room, group_room,
    parse_group_room,
};
pub use infrastructure::InMemoryPushHub;
