use anyhow::Result;
use async_trait::async_trait;

use super::model::{ConnectionId, PushFrame};

/// 实时推送通道（按房间分组的双向连接）
///
/// 发送类方法返回实际投递到的连接数。
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn join_room(&self, connection: ConnectionId, room: &str) -> Result<()>;

    async fn leave_room(&self, connection: ConnectionId, room: &str) -> Result<()>;

    /// 连接离开所有房间，返回离开的房间名
    async fn leave_all(&self, connection: ConnectionId) -> Result<Vec<String>>;

    /// 把用户当前所有连接加入房间
    async fn add_user_to_room(&self, user_id: i64, room: &str) -> Result<()>;

    async fn remove_user_from_room(&self, user_id: i64, room: &str) -> Result<()>;

    async fn send_to_room(&self, room: &str, frame: PushFrame) -> Result<usize>;

    async fn send_to_user(&self, user_id: i64, frame: PushFrame) -> Result<usize>;

    async fn send_to_all(&self, frame: PushFrame) -> Result<usize>;
}
