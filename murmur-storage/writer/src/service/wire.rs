//! 依赖装配：代理、存储、推送中心、通知器与消费者

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use murmur_im_core::broker::KafkaBrokerConsumer;
use murmur_im_core::{BrokerConsumer, BrokerKind, InMemoryExchange};
use murmur_push::{ChatNotifier, InMemoryPushHub};
use murmur_storage_model::{MessageRepository, ReactionRepository};
use murmur_storage_repository::{InMemoryChatStore, PostgresChatStore};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::StorageWriterConfig;
use crate::domain::MessageDeliveryService;
use crate::interface::messaging::StorageWriterConsumer;

pub struct WriterComponents {
    pub consumer: Arc<StorageWriterConsumer>,
    pub notifier: ChatNotifier,
    pub hub: InMemoryPushHub,
    /// 仅 memory 代理下存在，供同进程发布端使用
    pub exchange: Option<InMemoryExchange>,
    pub fanout_task: JoinHandle<()>,
}

struct StorePorts {
    messages: Arc<dyn MessageRepository>,
    reactions: Arc<dyn ReactionRepository>,
}

async fn build_store(config: &StorageWriterConfig) -> Result<StorePorts> {
    match &config.postgres {
        Some(postgres) => {
            let store = PostgresChatStore::connect(postgres).await?;
            store.init_schema().await?;
            info!("storage writer using postgres store");
            let store = Arc::new(store);
            Ok(StorePorts {
                messages: store.clone(),
                reactions: store,
            })
        }
        None => {
            info!("storage writer using in-memory store");
            let store = Arc::new(InMemoryChatStore::new());
            Ok(StorePorts {
                messages: store.clone(),
                reactions: store,
            })
        }
    }
}

fn build_consumer(
    config: &StorageWriterConfig,
) -> Result<(Arc<dyn BrokerConsumer>, Option<InMemoryExchange>)> {
    match config.broker {
        BrokerKind::Kafka => {
            let cluster = config
                .kafka
                .as_ref()
                .ok_or_else(|| anyhow!("kafka broker selected without a kafka profile"))?;
            let consumer =
                KafkaBrokerConsumer::new(cluster, &config.exchange, &config.queue, &config.binding)
                    .context("failed to build kafka consumer")?;
            Ok((Arc::new(consumer), None))
        }
        BrokerKind::Memory => {
            let exchange = InMemoryExchange::new(&config.exchange);
            exchange.declare_queue(&config.queue, &config.binding);
            let consumer = exchange
                .consumer(&config.queue)
                .context("failed to attach in-memory consumer")?;
            Ok((Arc::new(consumer), Some(exchange)))
        }
    }
}

pub async fn initialize(config: &StorageWriterConfig) -> Result<WriterComponents> {
    let store = build_store(config).await?;
    let (broker_consumer, exchange) = build_consumer(config)?;

    let hub = InMemoryPushHub::new();
    let (notifier, fanout_task) =
        ChatNotifier::spawn(Arc::new(hub.clone()), config.fanout_queue_capacity);

    let service = Arc::new(MessageDeliveryService::new(
        store.messages,
        store.reactions,
        notifier.clone(),
    ));
    let consumer = Arc::new(StorageWriterConsumer::new(broker_consumer, service, config));

    Ok(WriterComponents {
        consumer,
        notifier,
        hub,
        exchange,
        fanout_task,
    })
}
