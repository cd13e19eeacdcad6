//! 消息发布服务
//!
//! 校验 → 计算路由键 → 序列化 → 发布。发布失败直接返回给调用方，不做本地重试。

use std::sync::Arc;

use murmur_im_core::metrics::DeliveryMetrics;
use murmur_im_core::{BrokerPublisher, ChatError, ChatResult, RoutingKey};
use murmur_storage_model::OutboundMessage;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::model::{MessageSubmission, SendMessageRequest};

/// 发布回执：代理已接收，尚未持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub client_message_id: Uuid,
    pub routing_key: String,
}

pub struct MessagePublishService {
    publisher: Arc<dyn BrokerPublisher>,
    metrics: &'static DeliveryMetrics,
}

impl MessagePublishService {
    pub fn new(publisher: Arc<dyn BrokerPublisher>) -> Self {
        Self {
            publisher,
            metrics: DeliveryMetrics::global(),
        }
    }

    /// 处理客户端发送请求
    #[instrument(skip(self, request), fields(sender_id = request.sender_id, message_type = %request.message_type))]
    pub async fn send(&self, request: SendMessageRequest) -> ChatResult<PublishReceipt> {
        let submission = MessageSubmission::prepare(request)?;
        self.publish(submission.routing_key, &submission.envelope)
            .await
    }

    /// 按给定路由键发布已构造好的消息
    pub async fn publish(
        &self,
        routing_key: RoutingKey,
        envelope: &OutboundMessage,
    ) -> ChatResult<PublishReceipt> {
        let client_message_id = envelope
            .client_message_id
            .ok_or_else(|| ChatError::validation("client_message_id is required"))?;
        let payload = envelope
            .to_bytes()
            .map_err(|err| ChatError::validation(format!("failed to serialize message: {err}")))?;
        let key = routing_key.to_string();
        let route = routing_key.category();

        match self.publisher.publish(&key, payload).await {
            Ok(()) => {
                self.metrics
                    .messages_published_total
                    .with_label_values(&[route])
                    .inc();
                debug!(routing_key = %key, client_message_id = %client_message_id, "message published");
                Ok(PublishReceipt {
                    client_message_id,
                    routing_key: key,
                })
            }
            Err(err) => {
                self.metrics
                    .publish_failure_total
                    .with_label_values(&[route])
                    .inc();
                warn!(routing_key = %key, error = %err, "message publish failed");
                Err(err.into())
            }
        }
    }
}
