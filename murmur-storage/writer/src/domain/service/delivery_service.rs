//! 消息投递领域服务
//!
//! 持久化 → 组装视图（附件、回复链、表情反应）→ 按路由受众扇出。

use std::sync::Arc;

use murmur_im_core::{Audience, ChatResult, RoutingKey, StorageResultExt, truncate_for_log};
use murmur_push::{ChatNotifier, PushEvent};
use murmur_storage_model::{
    Message, MessageRepository, MessageView, OutboundMessage, PersistOutcome, ReactionRepository,
};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::domain::model::{DecodedDelivery, DeliveryOutcome};

/// 回复链最大解析深度
pub const REPLY_CHAIN_DEPTH: usize = 3;

pub struct MessageDeliveryService {
    messages: Arc<dyn MessageRepository>,
    reactions: Arc<dyn ReactionRepository>,
    notifier: ChatNotifier,
}

impl MessageDeliveryService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        reactions: Arc<dyn ReactionRepository>,
        notifier: ChatNotifier,
    ) -> Self {
        Self {
            messages,
            reactions,
            notifier,
        }
    }

    /// 处理一条已解码的投递
    #[instrument(skip(self, delivery), fields(routing_key = %delivery.raw_routing_key))]
    pub async fn deliver(&self, delivery: DecodedDelivery) -> ChatResult<DeliveryOutcome> {
        let outcome = self.persist(delivery.envelope).await?;
        let view = self.build_view(outcome.message()).await?;
        match delivery.routing_key {
            Some(routing_key) => self.dispatch(routing_key, view),
            None => warn!(
                message_id = outcome.message().id,
                "unknown routing key format, fan-out skipped"
            ),
        }

        Ok(match outcome {
            PersistOutcome::Inserted(message) => {
                debug!(
                    message_id = message.id,
                    preview = %truncate_for_log(&message.content, 32),
                    "message persisted"
                );
                DeliveryOutcome::Persisted {
                    message_id: message.id,
                }
            }
            PersistOutcome::Duplicate(message) => {
                debug!(message_id = message.id, "redelivered message already stored");
                DeliveryOutcome::Duplicate {
                    message_id: message.id,
                }
            }
        })
    }

    async fn persist(&self, envelope: OutboundMessage) -> ChatResult<PersistOutcome> {
        let (message, attachments) = envelope.into_parts();
        self.messages
            .insert_with_attachments(message, attachments)
            .await
            .into_storage()
    }

    /// 组装推送视图；被回复消息递归解析，深度受限
    pub async fn build_view(&self, message: &Message) -> ChatResult<MessageView> {
        let mut chain = vec![self.decorate(message).await?];
        let mut next = message.reply_to_message_id;
        while let Some(reply_id) = next {
            if chain.len() > REPLY_CHAIN_DEPTH {
                break;
            }
            let Some(replied) = self.messages.find_by_id(reply_id).await.into_storage()? else {
                break;
            };
            next = replied.reply_to_message_id;
            chain.push(self.decorate(&replied).await?);
        }

        let mut view = chain.pop().unwrap_or_else(|| MessageView::from(message));
        while let Some(mut parent) = chain.pop() {
            parent.replied_message = Some(Box::new(view));
            view = parent;
        }
        Ok(view)
    }

    async fn decorate(&self, message: &Message) -> ChatResult<MessageView> {
        let mut view = MessageView::from(message);
        view.attachments = self.messages.attachments_of(message.id).await.into_storage()?;
        view.reactions = self.reactions.reactions_of(message.id).await.into_storage()?;
        Ok(view)
    }

    fn dispatch(&self, routing_key: RoutingKey, view: MessageView) {
        match routing_key.audience() {
            Audience::Group(group_id) => self.notifier.notify_group(
                PushEvent::ReceiveGroupMessage,
                group_id,
                json!({ "group_id": group_id, "message": view }),
            ),
            audience @ (Audience::User(_) | Audience::Everyone) => {
                self.notifier
                    .notify_audience(PushEvent::ReceiveMessage, audience, view)
            }
        }
    }
}
