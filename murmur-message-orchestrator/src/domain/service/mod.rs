pub mod publish_service;

pub use publish_service::{MessagePublishService, PublishReceipt};
