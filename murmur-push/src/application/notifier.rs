//! 扇出通知
//!
//! `ChatNotifier::notify` 只做入队，不等待推送结果；
//! 后台 `FanoutDispatcher` 按目标调用推送通道。队列满时事件被丢弃并计数。

use std::sync::Arc;

use murmur_im_core::Audience;
use murmur_im_core::metrics::PushMetrics;
use serde::Serialize;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{PushChannel, PushEvent, PushFrame, PushTarget, call_room, group_room};

pub const DEFAULT_FANOUT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct FanoutJob {
    target: PushTarget,
    frame: PushFrame,
}

/// 后台扇出任务
pub struct FanoutDispatcher {
    channel: Arc<dyn PushChannel>,
    receiver: Receiver<FanoutJob>,
    metrics: &'static PushMetrics,
}

impl FanoutDispatcher {
    async fn run(mut self) {
        while let Some(job) = self.receiver.recv().await {
            let event = job.frame.event;
            let label = job.target.label();
            let result = match &job.target {
                PushTarget::User(user_id) => self.channel.send_to_user(*user_id, job.frame).await,
                PushTarget::Room(room) => self.channel.send_to_room(room, job.frame).await,
                PushTarget::Everyone => self.channel.send_to_all(job.frame).await,
            };
            match result {
                Ok(delivered) => {
                    self.metrics
                        .events_pushed_total
                        .with_label_values(&[event.as_str(), label])
                        .inc();
                    debug!(event = %event, target = ?job.target, delivered, "event pushed");
                }
                Err(err) => {
                    warn!(event = %event, target = ?job.target, error = %err, "push failed");
                }
            }
        }
        debug!("fanout dispatcher stopped");
    }
}

/// 业务侧通知入口
#[derive(Clone)]
pub struct ChatNotifier {
    sender: Sender<FanoutJob>,
    channel: Arc<dyn PushChannel>,
    metrics: &'static PushMetrics,
}

impl ChatNotifier {
    /// 创建通知器并在当前 runtime 上启动扇出任务
    pub fn spawn(channel: Arc<dyn PushChannel>, capacity: usize) -> (Self, JoinHandle<()>) {
        let metrics = PushMetrics::global();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dispatcher = FanoutDispatcher {
            channel: channel.clone(),
            receiver,
            metrics,
        };
        let handle = tokio::spawn(dispatcher.run());
        (
            Self {
                sender,
                channel,
                metrics,
            },
            handle,
        )
    }

    pub fn notify(&self, event: PushEvent, target: PushTarget, payload: impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = %event, error = %err, "failed to serialize push payload");
                return;
            }
        };
        let job = FanoutJob {
            target,
            frame: PushFrame::new(event, payload),
        };
        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.record_drop(event);
                warn!(event = %event, target = ?job.target, "fanout queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.record_drop(event);
                warn!(event = %event, "fanout dispatcher closed, event dropped");
            }
        }
    }

    pub fn notify_group(&self, event: PushEvent, group_id: i64, payload: impl Serialize) {
        self.notify(event, PushTarget::group(group_id), payload);
    }

    pub fn notify_user(&self, event: PushEvent, user_id: i64, payload: impl Serialize) {
        self.notify(event, PushTarget::User(user_id), payload);
    }

    pub fn notify_all(&self, event: PushEvent, payload: impl Serialize) {
        self.notify(event, PushTarget::Everyone, payload);
    }

    pub fn notify_audience(&self, event: PushEvent, audience: Audience, payload: impl Serialize) {
        self.notify(event, PushTarget::from(audience), payload);
    }

    /// 成员变更后同步用户的群房间
    pub async fn join_group_room(&self, user_id: i64, group_id: i64) {
        self.sync_room(user_id, &group_room(group_id), true).await;
    }

    pub async fn leave_group_room(&self, user_id: i64, group_id: i64) {
        self.sync_room(user_id, &group_room(group_id), false).await;
    }

    pub async fn join_call_room(&self, user_id: i64, call_id: &str) {
        self.sync_room(user_id, &call_room(call_id), true).await;
    }

    pub async fn leave_call_room(&self, user_id: i64, call_id: &str) {
        self.sync_room(user_id, &call_room(call_id), false).await;
    }

    pub fn channel(&self) -> Arc<dyn PushChannel> {
        self.channel.clone()
    }

    async fn sync_room(&self, user_id: i64, room: &str, join: bool) {
        let result = if join {
            self.channel.add_user_to_room(user_id, room).await
        } else {
            self.channel.remove_user_from_room(user_id, room).await
        };
        if let Err(err) = result {
            warn!(user_id, room, join, error = %err, "room sync failed");
        }
    }

    fn record_drop(&self, event: PushEvent) {
        self.metrics
            .events_dropped_total
            .with_label_values(&[event.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryPushHub;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn notify_routes_by_target() {
        let hub = InMemoryPushHub::new();
        let (conn, mut rx) = hub.connect(5).await;
        hub.join_room(conn, "Group_7").await.unwrap();
        let (notifier, _handle) = ChatNotifier::spawn(Arc::new(hub.clone()), 16);

        notifier.notify_audience(PushEvent::ReceiveGroupMessage, Audience::Group(7), json!({"id": 1}));
        notifier.notify_user(PushEvent::ReceiveMessage, 5, json!({"id": 2}));
        notifier.notify_user(PushEvent::ReceiveMessage, 6, json!({"id": 3}));

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.event, PushEvent::ReceiveGroupMessage);
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.payload["id"], 2);
    }

    #[tokio::test]
    async fn room_sync_follows_membership() {
        let hub = InMemoryPushHub::new();
        let (conn, _rx) = hub.connect(5).await;
        let (notifier, _handle) = ChatNotifier::spawn(Arc::new(hub.clone()), 16);

        notifier.join_group_room(5, 9).await;
        assert_eq!(hub.room_members("Group_9").await, vec![conn]);
        notifier.leave_group_room(5, 9).await;
        assert!(hub.room_members("Group_9").await.is_empty());
    }
}
