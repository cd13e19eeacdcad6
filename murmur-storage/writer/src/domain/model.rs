use std::time::Instant;

use murmur_im_core::{Delivery, DeliveryTag, RoutingKey};
use murmur_storage_model::OutboundMessage;

/// 单条投递的处理上下文
///
/// 每条投递独立构造，处理过程中不与其他投递共享可变状态。
#[derive(Debug)]
pub struct DeliveryScope {
    pub tag: DeliveryTag,
    pub raw_routing_key: String,
    pub redelivered: bool,
    pub received_at: Instant,
    payload: Vec<u8>,
}

/// 解码后的投递
///
/// 路由键只决定扇出受众；无法识别时消息照常持久化，仅跳过扇出。
#[derive(Debug, Clone)]
pub struct DecodedDelivery {
    pub raw_routing_key: String,
    pub routing_key: Option<RoutingKey>,
    pub envelope: OutboundMessage,
}

impl DeliveryScope {
    pub fn new(delivery: Delivery) -> Self {
        Self {
            tag: delivery.tag,
            raw_routing_key: delivery.routing_key,
            redelivered: delivery.redelivered,
            received_at: Instant::now(),
            payload: delivery.payload,
        }
    }

    /// 解析消息体；失败说明是无法恢复的坏消息
    pub fn decode(&self) -> Result<DecodedDelivery, String> {
        let envelope = OutboundMessage::from_bytes(&self.payload).map_err(|err| err.to_string())?;
        Ok(DecodedDelivery {
            raw_routing_key: self.raw_routing_key.clone(),
            routing_key: RoutingKey::parse(&self.raw_routing_key).ok(),
            envelope,
        })
    }
}

/// 单条投递的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 新写入并已扇出
    Persisted { message_id: i64 },
    /// 重投递命中幂等键，复用已存消息并再次扇出
    Duplicate { message_id: i64 },
    /// 坏消息：确认并丢弃
    Malformed,
}

impl DeliveryOutcome {
    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Persisted { .. } => "persisted",
            DeliveryOutcome::Duplicate { .. } => "duplicate",
            DeliveryOutcome::Malformed => "malformed",
        }
    }
}
