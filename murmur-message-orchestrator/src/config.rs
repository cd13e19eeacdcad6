use anyhow::{Result, anyhow};
use murmur_im_core::broker::DEFAULT_EXCHANGE;
use murmur_im_core::{BrokerKind, KafkaClusterConfig, MurmurAppConfig, env_override, resolve};

/// 发布端运行时配置
///
/// 环境变量（`MURMUR_ORCHESTRATOR_*`）优先于配置文件。
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub broker: BrokerKind,
    pub kafka: Option<KafkaClusterConfig>,
    pub exchange: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            broker: BrokerKind::Memory,
            kafka: None,
            exchange: DEFAULT_EXCHANGE.to_string(),
        }
    }
}

impl PublisherConfig {
    pub fn from_app_config(app: &MurmurAppConfig) -> Result<Self> {
        let service = app.orchestrator_service();

        let broker = resolve("MURMUR_ORCHESTRATOR_BROKER", service.broker, BrokerKind::Memory);
        let mut kafka = service
            .kafka
            .as_deref()
            .and_then(|name| app.kafka_profile(name))
            .cloned();
        if let Some(bootstrap) = env_override::<String>("MURMUR_ORCHESTRATOR_KAFKA_BOOTSTRAP") {
            kafka.get_or_insert_with(KafkaClusterConfig::default).bootstrap_servers = bootstrap;
        }
        if broker == BrokerKind::Kafka && kafka.is_none() {
            return Err(anyhow!(
                "orchestrator uses the kafka broker but no kafka profile is configured"
            ));
        }

        Ok(Self {
            broker,
            kafka,
            exchange: resolve(
                "MURMUR_ORCHESTRATOR_EXCHANGE",
                service.exchange,
                DEFAULT_EXCHANGE.to_string(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_im_core::config::parse_config;

    #[test]
    fn defaults_to_in_memory_exchange() {
        let app = parse_config("").unwrap();
        let config = PublisherConfig::from_app_config(&app).unwrap();
        assert_eq!(config.broker, BrokerKind::Memory);
        assert_eq!(config.exchange, DEFAULT_EXCHANGE);
        assert!(config.kafka.is_none());
    }

    #[test]
    fn kafka_profile_is_resolved_by_name() {
        let app = parse_config(
            r#"
            [kafka.main]
            bootstrap_servers = "kafka:9092"

            [services.orchestrator]
            broker = "kafka"
            kafka = "main"
            exchange = "chat_events"
            "#,
        )
        .unwrap();
        let config = PublisherConfig::from_app_config(&app).unwrap();
        assert_eq!(config.broker, BrokerKind::Kafka);
        assert_eq!(config.kafka.unwrap().bootstrap_servers, "kafka:9092");
        assert_eq!(config.exchange, "chat_events");

        let app = parse_config(
            r#"
            [services.orchestrator]
            broker = "kafka"
            "#,
        )
        .unwrap();
        assert!(PublisherConfig::from_app_config(&app).is_err());
    }
}
