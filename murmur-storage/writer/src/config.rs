use anyhow::{Result, anyhow};
use murmur_im_core::broker::{DEFAULT_BINDING, DEFAULT_EXCHANGE, DEFAULT_QUEUE};
use murmur_im_core::{
    BrokerKind, KafkaClusterConfig, MurmurAppConfig, PostgresInstanceConfig, env_override, resolve,
};
use murmur_push::DEFAULT_FANOUT_QUEUE_CAPACITY;

pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_MAX_RETRY_BACKOFF_MS: u64 = 2_000;

/// 存储写入服务运行时配置
///
/// 环境变量（`MURMUR_WRITER_*`）优先于配置文件。
#[derive(Clone, Debug)]
pub struct StorageWriterConfig {
    pub broker: BrokerKind,
    pub kafka: Option<KafkaClusterConfig>,
    pub exchange: String,
    pub queue: String,
    pub binding: String,
    pub postgres: Option<PostgresInstanceConfig>,
    pub worker_concurrency: usize,
    pub shutdown_grace_ms: u64,
    /// 处理失败后 nack 前的初始退避，连续失败时翻倍
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
    pub fanout_queue_capacity: usize,
}

impl Default for StorageWriterConfig {
    fn default() -> Self {
        Self {
            broker: BrokerKind::Memory,
            kafka: None,
            exchange: DEFAULT_EXCHANGE.to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            binding: DEFAULT_BINDING.to_string(),
            postgres: None,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_retry_backoff_ms: DEFAULT_MAX_RETRY_BACKOFF_MS,
            fanout_queue_capacity: DEFAULT_FANOUT_QUEUE_CAPACITY,
        }
    }
}

impl StorageWriterConfig {
    pub fn from_app_config(app: &MurmurAppConfig) -> Result<Self> {
        let service = app.storage_writer_service();

        let broker = resolve("MURMUR_WRITER_BROKER", service.broker, BrokerKind::Memory);

        let mut kafka = service
            .kafka
            .as_deref()
            .and_then(|name| app.kafka_profile(name))
            .cloned();
        if let Some(bootstrap) = env_override::<String>("MURMUR_WRITER_KAFKA_BOOTSTRAP") {
            kafka.get_or_insert_with(KafkaClusterConfig::default).bootstrap_servers = bootstrap;
        }
        if broker == BrokerKind::Kafka && kafka.is_none() {
            return Err(anyhow!(
                "storage writer uses the kafka broker but no kafka profile is configured"
            ));
        }

        let mut postgres = service
            .postgres
            .as_deref()
            .and_then(|name| app.postgres_profile(name))
            .cloned();
        if let Some(url) = env_override::<String>("MURMUR_WRITER_POSTGRES_URL") {
            postgres.get_or_insert_with(PostgresInstanceConfig::default).url = url;
        }

        let worker_concurrency = resolve(
            "MURMUR_WRITER_WORKERS",
            service.worker_concurrency,
            DEFAULT_WORKER_CONCURRENCY,
        )
        .max(1);

        let retry_backoff_ms = resolve(
            "MURMUR_WRITER_RETRY_BACKOFF_MS",
            service.retry_backoff_ms,
            DEFAULT_RETRY_BACKOFF_MS,
        );
        let max_retry_backoff_ms = resolve(
            "MURMUR_WRITER_MAX_RETRY_BACKOFF_MS",
            service.max_retry_backoff_ms,
            DEFAULT_MAX_RETRY_BACKOFF_MS,
        )
        .max(retry_backoff_ms);

        Ok(Self {
            broker,
            kafka,
            exchange: resolve(
                "MURMUR_WRITER_EXCHANGE",
                service.exchange,
                DEFAULT_EXCHANGE.to_string(),
            ),
            queue: resolve("MURMUR_WRITER_QUEUE", service.queue, DEFAULT_QUEUE.to_string()),
            binding: resolve(
                "MURMUR_WRITER_BINDING",
                service.binding,
                DEFAULT_BINDING.to_string(),
            ),
            postgres,
            worker_concurrency,
            shutdown_grace_ms: resolve(
                "MURMUR_WRITER_SHUTDOWN_GRACE_MS",
                service.shutdown_grace_ms,
                DEFAULT_SHUTDOWN_GRACE_MS,
            ),
            retry_backoff_ms,
            max_retry_backoff_ms,
            fanout_queue_capacity: app
                .push_service()
                .fanout_queue_capacity
                .unwrap_or(DEFAULT_FANOUT_QUEUE_CAPACITY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_im_core::config::parse_config;

    #[test]
    fn reads_service_section_and_profiles() {
        let app = parse_config(
            r#"
            [kafka.main]
            bootstrap_servers = "kafka:9092"

            [postgres.chat]
            url = "postgres://chat@db/chat"

            [services.storage_writer]
            broker = "kafka"
            kafka = "main"
            postgres = "chat"
            queue = "writer_queue"
            worker_concurrency = 4
            "#,
        )
        .unwrap();

        let config = StorageWriterConfig::from_app_config(&app).unwrap();
        assert_eq!(config.broker, BrokerKind::Kafka);
        assert_eq!(config.kafka.unwrap().bootstrap_servers, "kafka:9092");
        assert_eq!(config.postgres.unwrap().url, "postgres://chat@db/chat");
        assert_eq!(config.queue, "writer_queue");
        assert_eq!(config.exchange, DEFAULT_EXCHANGE);
        assert_eq!(config.binding, "chat.#");
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.shutdown_grace_ms, DEFAULT_SHUTDOWN_GRACE_MS);
        assert_eq!(config.retry_backoff_ms, DEFAULT_RETRY_BACKOFF_MS);
        assert_eq!(config.max_retry_backoff_ms, DEFAULT_MAX_RETRY_BACKOFF_MS);
    }

    #[test]
    fn retry_backoff_cap_never_below_base() {
        let app = parse_config(
            r#"
            [services.storage_writer]
            retry_backoff_ms = 800
            max_retry_backoff_ms = 200
            "#,
        )
        .unwrap();

        let config = StorageWriterConfig::from_app_config(&app).unwrap();
        assert_eq!(config.retry_backoff_ms, 800);
        assert_eq!(config.max_retry_backoff_ms, 800);
    }

    #[test]
    fn kafka_without_profile_is_rejected() {
        let app = parse_config(
            r#"
            [services.storage_writer]
            broker = "kafka"
            "#,
        )
        .unwrap();
        assert!(StorageWriterConfig::from_app_config(&app).is_err());
    }
}
