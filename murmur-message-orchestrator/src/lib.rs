//! Murmur 消息发布编排
//!
//! 请求校验、内容类型推导、路由键计算与发布。

pub mod config;
pub mod domain;
pub mod service;

pub use config::PublisherConfig;
pub use domain::model::{MessageSubmission, SendMessageRequest, content_type_for};
pub use domain::service::{MessagePublishService, PublishReceipt};
pub use service::PublisherComponents;
