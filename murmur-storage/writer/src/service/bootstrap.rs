//! 应用启动器：装配依赖、运行消费循环、处理停机
use anyhow::Result;
use murmur_im_core::MurmurAppConfig;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::StorageWriterConfig;
use crate::service::wire::{self, WriterComponents};

pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run(app: &'static MurmurAppConfig) -> Result<()> {
        let config = StorageWriterConfig::from_app_config(app)?;
        info!(
            broker = ?config.broker,
            exchange = %config.exchange,
            queue = %config.queue,
            binding = %config.binding,
            workers = config.worker_concurrency,
            "starting storage writer"
        );

        let components = wire::initialize(&config).await?;
        Self::start_consumer(components).await
    }

    /// 运行消费者直到 Ctrl-C，然后优雅停机
    pub async fn start_consumer(components: WriterComponents) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = components.consumer.clone();
        let mut consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

        let result = tokio::select! {
            joined = &mut consumer_task => joined?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
                consumer_task.await?
            }
        };

        if let Err(err) = &result {
            error!(error = %err, "storage writer consumer failed");
        }

        // 通知器全部释放后扇出任务自然退出
        drop(components.notifier);
        drop(components.consumer);
        let _ = components.fanout_task.await;

        info!("storage writer stopped");
        result
    }
}
