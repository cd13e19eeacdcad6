//! 依赖装配：按配置选择代理并构建发布服务

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use murmur_im_core::broker::KafkaBrokerPublisher;
use murmur_im_core::{BrokerKind, BrokerPublisher, InMemoryExchange};
use tracing::{info, warn};

use crate::config::PublisherConfig;
use crate::domain::service::MessagePublishService;

pub struct PublisherComponents {
    pub service: Arc<MessagePublishService>,
    /// 仅 memory 代理下存在
    pub exchange: Option<InMemoryExchange>,
}

/// `local` 为同进程消费端已声明队列的交换机；memory 代理下优先复用
pub fn initialize(
    config: &PublisherConfig,
    local: Option<InMemoryExchange>,
) -> Result<PublisherComponents> {
    let (publisher, exchange): (Arc<dyn BrokerPublisher>, Option<InMemoryExchange>) =
        match config.broker {
            BrokerKind::Kafka => {
                let cluster = config
                    .kafka
                    .as_ref()
                    .ok_or_else(|| anyhow!("kafka broker selected without a kafka profile"))?;
                let publisher = KafkaBrokerPublisher::new(cluster, config.exchange.as_str())
                    .context("failed to build kafka publisher")?;
                info!(topic = %config.exchange, "orchestrator publishing to kafka");
                (Arc::new(publisher), None)
            }
            BrokerKind::Memory => {
                let exchange = match local {
                    Some(exchange) => exchange,
                    None => {
                        warn!(
                            exchange = %config.exchange,
                            "no local consumer attached, messages on unbound routes are dropped"
                        );
                        InMemoryExchange::new(&config.exchange)
                    }
                };
                info!(exchange = %config.exchange, "orchestrator publishing to in-memory exchange");
                (Arc::new(exchange.clone()), Some(exchange))
            }
        };

    Ok(PublisherComponents {
        service: Arc::new(MessagePublishService::new(publisher)),
        exchange,
    })
}
