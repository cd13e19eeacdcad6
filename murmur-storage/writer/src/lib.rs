//! Murmur 存储写入服务
//!
//! 从持久队列消费聊天消息：解码 → 持久化 → 组装视图 → 扇出 → 确认。

pub mod config;
pub mod domain;
pub mod interface;
pub mod service;

pub use config::StorageWriterConfig;
pub use domain::{DeliveryOutcome, DeliveryScope, MessageDeliveryService};
pub use interface::messaging::StorageWriterConsumer;
pub use service::ApplicationBootstrap;
