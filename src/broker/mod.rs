//! 消息代理抽象
//!
//! 一个 topic 交换机 + 按模式绑定的持久队列：
//! - [`routing`]：路由键语法与绑定模式匹配
//! - [`memory`]：进程内交换机（开发和单测阶段使用）
//! - [`kafka`]：基于 rdkafka 的适配器（交换机即主题，持久队列即消费者组）

pub mod kafka;
pub mod memory;
mod offsets;
pub mod routing;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ChatError;

pub use kafka::{KafkaBrokerConsumer, KafkaBrokerPublisher};
pub use memory::{InMemoryConsumer, InMemoryExchange};
pub use routing::{Audience, BindingPattern, RoutingKey, RoutingKeyError};

/// 默认交换机名
pub const DEFAULT_EXCHANGE: &str = "chat_topic_exchange";
/// 默认持久队列名
pub const DEFAULT_QUEUE: &str = "chat_messages_queue";
/// 默认绑定模式
pub const DEFAULT_BINDING: &str = "chat.#";

/// 代理层错误
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume failed: {0}")]
    Consume(String),
    #[error("acknowledge failed: {0}")]
    Acknowledge(String),
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    #[error("unknown delivery tag: {0:?}")]
    UnknownDelivery(DeliveryTag),
}

impl From<BrokerError> for ChatError {
    fn from(err: BrokerError) -> Self {
        ChatError::Transport(err.to_string())
    }
}

/// 投递标识：分区 + 偏移（进程内交换机使用分区 0 与递增序号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
    pub partition: i32,
    pub offset: i64,
}

/// 一次投递
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// 是否为 nack 之后的重新投递
    pub redelivered: bool,
}

/// 发布端口
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// 发布到交换机；成功只代表代理已接收
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
}

/// 消费端口
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// 等待下一条投递；消费者关闭后返回 `Ok(None)`
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError>;

    /// 确认投递，消息从队列移除
    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// 否认投递；`requeue` 为 true 时重新投递
    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError>;

    /// 关闭消费者，未确认的投递交还给队列
    async fn close(&self) -> Result<(), BrokerError>;
}
