pub mod model;
pub mod repository;

pub use model::{
    ConnectionId, PushEvent, PushFrame, PushTarget, call_room, group_room, parse_group_room,
};
pub use repository::PushChannel;
