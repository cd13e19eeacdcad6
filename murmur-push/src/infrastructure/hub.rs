//! 进程内推送中心
//!
//! 每个连接持有一个无界发送端，房间是连接集合。
//! 接收端已关闭的连接在发送时跳过，由断开流程清理。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace};

use crate::domain::{ConnectionId, PushChannel, PushFrame};

struct Connection {
    user_id: i64,
    sender: UnboundedSender<PushFrame>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl HubState {
    fn join(&mut self, connection: ConnectionId, room: &str) -> bool {
        let Some(conn) = self.connections.get_mut(&connection) else {
            return false;
        };
        conn.rooms.insert(room.to_string());
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection);
        true
    }

    fn leave(&mut self, connection: ConnectionId, room: &str) {
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.rooms.remove(room);
        }
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&connection);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn connections_of(&self, user_id: i64) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }

    fn deliver<'a>(&self, targets: impl Iterator<Item = &'a ConnectionId>, frame: &PushFrame) -> usize {
        targets
            .filter_map(|id| self.connections.get(id))
            .filter(|conn| conn.sender.send(frame.clone()).is_ok())
            .count()
    }
}

/// 内存推送中心，实现用于开发和单测阶段
#[derive(Clone, Default)]
pub struct InMemoryPushHub {
    state: Arc<RwLock<HubState>>,
}

impl InMemoryPushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新连接，返回连接 ID 与帧接收端
    pub async fn connect(&self, user_id: i64) -> (ConnectionId, UnboundedReceiver<PushFrame>) {
        let (sender, receiver) = unbounded_channel();
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = ConnectionId(state.next_id);
        state.connections.insert(
            id,
            Connection {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        );
        debug!(connection = %id, user_id, "push connection registered");
        (id, receiver)
    }

    /// 注销连接；返回所属用户与其所在房间
    pub async fn disconnect(&self, connection: ConnectionId) -> Option<(i64, Vec<String>)> {
        let mut state = self.state.write().await;
        let conn = state.connections.remove(&connection)?;
        let mut rooms: Vec<String> = conn.rooms.into_iter().collect();
        rooms.sort();
        for room in &rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&connection);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        debug!(connection = %connection, user_id = conn.user_id, "push connection removed");
        Some((conn.user_id, rooms))
    }

    pub async fn user_of(&self, connection: ConnectionId) -> Option<i64> {
        self.state
            .read()
            .await
            .connections
            .get(&connection)
            .map(|conn| conn.user_id)
    }

    /// 房间内的连接（按 ID 排序）
    pub async fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .state
            .read()
            .await
            .rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

#[async_trait]
impl PushChannel for InMemoryPushHub {
    async fn join_room(&self, connection: ConnectionId, room: &str) -> Result<()> {
        if self.state.write().await.join(connection, room) {
            trace!(connection = %connection, room, "joined room");
        }
        Ok(())
    }

    async fn leave_room(&self, connection: ConnectionId, room: &str) -> Result<()> {
        self.state.write().await.leave(connection, room);
        Ok(())
    }

    async fn leave_all(&self, connection: ConnectionId) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        let mut rooms: Vec<String> = state
            .connections
            .get(&connection)
            .map(|conn| conn.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        for room in &rooms {
            state.leave(connection, room);
        }
        Ok(rooms)
    }

    async fn add_user_to_room(&self, user_id: i64, room: &str) -> Result<()> {
        let mut state = self.state.write().await;
        for connection in state.connections_of(user_id) {
            state.join(connection, room);
        }
        Ok(())
    }

    async fn remove_user_from_room(&self, user_id: i64, room: &str) -> Result<()> {
        let mut state = self.state.write().await;
        for connection in state.connections_of(user_id) {
            state.leave(connection, room);
        }
        Ok(())
    }

    async fn send_to_room(&self, room: &str, frame: PushFrame) -> Result<usize> {
        let state = self.state.read().await;
        Ok(match state.rooms.get(room) {
            Some(members) => state.deliver(members.iter(), &frame),
            None => 0,
        })
    }

    async fn send_to_user(&self, user_id: i64, frame: PushFrame) -> Result<usize> {
        let state = self.state.read().await;
        let targets = state.connections_of(user_id);
        Ok(state.deliver(targets.iter(), &frame))
    }

    async fn send_to_all(&self, frame: PushFrame) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.deliver(state.connections.keys(), &frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PushEvent;
    use serde_json::json;

    fn frame() -> PushFrame {
        PushFrame::new(PushEvent::ReceiveMessage, json!({"id": 1}))
    }

    #[tokio::test]
    async fn room_and_user_addressing() {
        let hub = InMemoryPushHub::new();
        let (a1, mut rx_a1) = hub.connect(1).await;
        let (_a2, mut rx_a2) = hub.connect(1).await;
        let (b, mut rx_b) = hub.connect(2).await;

        hub.join_room(a1, "Group_7").await.unwrap();
        hub.join_room(b, "Group_7").await.unwrap();

        assert_eq!(hub.send_to_room("Group_7", frame()).await.unwrap(), 2);
        assert!(rx_a1.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a2.try_recv().is_err());

        assert_eq!(hub.send_to_user(1, frame()).await.unwrap(), 2);
        assert_eq!(hub.send_to_all(frame()).await.unwrap(), 3);
        assert_eq!(hub.send_to_room("Group_8", frame()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn user_room_membership_covers_all_connections() {
        let hub = InMemoryPushHub::new();
        let (a1, _rx1) = hub.connect(1).await;
        let (a2, _rx2) = hub.connect(1).await;

        hub.add_user_to_room(1, "Call_x").await.unwrap();
        assert_eq!(hub.room_members("Call_x").await, vec![a1, a2]);

        hub.remove_user_from_room(1, "Call_x").await.unwrap();
        assert!(hub.room_members("Call_x").await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_and_leave_all_clear_rooms() {
        let hub = InMemoryPushHub::new();
        let (a, _rx) = hub.connect(1).await;
        hub.join_room(a, "Group_1").await.unwrap();
        hub.join_room(a, "Group_2").await.unwrap();

        assert_eq!(
            hub.leave_all(a).await.unwrap(),
            vec!["Group_1".to_string(), "Group_2".to_string()]
        );
        assert!(hub.room_members("Group_1").await.is_empty());

        hub.join_room(a, "Group_3").await.unwrap();
        let (user, rooms) = hub.disconnect(a).await.unwrap();
        assert_eq!(user, 1);
        assert_eq!(rooms, vec!["Group_3".to_string()]);
        assert_eq!(hub.connection_count().await, 0);
        assert!(hub.disconnect(a).await.is_none());
    }

    #[tokio::test]
    async fn closed_receivers_are_skipped() {
        let hub = InMemoryPushHub::new();
        let (_a, rx) = hub.connect(1).await;
        drop(rx);
        assert_eq!(hub.send_to_user(1, frame()).await.unwrap(), 0);
    }
}
