//! Murmur IM Core 公共库
//!
//! 提供统一的配置加载、错误类型、指标、日志初始化以及消息代理抽象

pub mod broker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing;
pub mod utils;

pub use broker::{
    Audience, BindingPattern, BrokerConsumer, BrokerError, BrokerPublisher, Delivery,
    DeliveryTag, InMemoryExchange, RoutingKey,
};
pub use config::{
    BrokerKind, CallServiceConfig, ConfigManager, KafkaClusterConfig, LoggingConfig,
    MurmurAppConfig, PostgresInstanceConfig, PushServiceConfig, StorageWriterServiceConfig,
    app_config, load_config,
};
pub use error::*;
pub use utils::*;
