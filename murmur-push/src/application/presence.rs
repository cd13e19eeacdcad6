//! 在线状态与群房间同步
//!
//! 连接建立时按持久化成员关系加入所有群房间，断开时离开全部房间。

use std::sync::Arc;

use anyhow::Result;
use murmur_storage_model::GroupRepository;
use serde_json::json;
use tracing::{info, instrument};

use super::notifier::ChatNotifier;
use crate::domain::{ConnectionId, PushChannel, PushEvent, group_room, parse_group_room};

pub struct PresenceService {
    channel: Arc<dyn PushChannel>,
    groups: Arc<dyn GroupRepository>,
    notifier: ChatNotifier,
}

impl PresenceService {
    pub fn new(groups: Arc<dyn GroupRepository>, notifier: ChatNotifier) -> Self {
        Self {
            channel: notifier.channel(),
            groups,
            notifier,
        }
    }

    /// 连接建立：加入成员所在的全部群房间，返回加入的群
    #[instrument(skip(self))]
    pub async fn on_connected(&self, connection: ConnectionId, user_id: i64) -> Result<Vec<i64>> {
        let group_ids = self.groups.groups_of_user(user_id).await?;
        for group_id in &group_ids {
            self.channel.join_room(connection, &group_room(*group_id)).await?;
            self.notifier.notify_group(
                PushEvent::UserJoinedGroup,
                *group_id,
                json!({ "group_id": group_id, "user_id": user_id }),
            );
        }
        info!(user_id, groups = group_ids.len(), "connection joined group rooms");
        Ok(group_ids)
    }

    /// 连接断开：离开全部房间，并通知其中的群房间
    #[instrument(skip(self))]
    pub async fn on_disconnected(&self, connection: ConnectionId, user_id: i64) -> Result<()> {
        let rooms = self.channel.leave_all(connection).await?;
        for group_id in rooms.iter().filter_map(|room| parse_group_room(room)) {
            self.notifier.notify_group(
                PushEvent::UserLeftGroup,
                group_id,
                json!({ "group_id": group_id, "user_id": user_id }),
            );
        }
        info!(user_id, rooms = rooms.len(), "connection left all rooms");
        Ok(())
    }
}
