//! Kafka 适配器
//!
//! 映射关系：交换机 = 主题，路由键 = 消息 key，持久队列 = 消费者组。
//! 绑定模式在客户端过滤，不匹配的记录视为已完成并跳过。
//! 提交按分区水位推进，乱序 ack 不会越过在途记录；
//! nack(requeue) 将分区 seek 回该记录。

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use super::offsets::OffsetTracker;
use super::routing::BindingPattern;
use super::{BrokerConsumer, BrokerError, BrokerPublisher, Delivery, DeliveryTag};
use crate::config::KafkaClusterConfig;

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

fn base_client_config(cluster: &KafkaClusterConfig) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &cluster.bootstrap_servers);
    if let Some(client_id) = &cluster.client_id {
        config.set("client.id", client_id);
    }
    if let Some(protocol) = &cluster.security_protocol {
        config.set("security.protocol", protocol);
    }
    if let (Some(user), Some(password)) = (&cluster.sasl_username, &cluster.sasl_password) {
        config.set("sasl.username", user);
        config.set("sasl.password", password);
    }
    for (key, value) in &cluster.options {
        config.set(key, value);
    }
    config
}

/// Kafka 发布者
pub struct KafkaBrokerPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaBrokerPublisher {
    pub fn new(cluster: &KafkaClusterConfig, topic: impl Into<String>) -> Result<Self, BrokerError> {
        let timeout_ms = cluster.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let producer: FutureProducer = base_client_config(cluster)
            .set("message.timeout.ms", timeout_ms.to_string())
            .create()
            .map_err(|err| BrokerError::Unavailable(err.to_string()))?;

        let topic = topic.into();
        info!(
            bootstrap = %cluster.bootstrap_servers,
            topic = %topic,
            "Kafka publisher created"
        );

        Ok(Self {
            producer,
            topic,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

#[async_trait]
impl BrokerPublisher for KafkaBrokerPublisher {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let record = FutureRecord::to(&self.topic)
            .key(routing_key)
            .payload(&payload);

        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map(|_| ())
            .map_err(|(err, _)| BrokerError::Publish(err.to_string()))
    }
}

/// Kafka 消费者
pub struct KafkaBrokerConsumer {
    consumer: StreamConsumer,
    topic: String,
    binding: BindingPattern,
    /// 已 nack 待重新投递的记录
    pending_redelivery: Mutex<HashSet<DeliveryTag>>,
    offsets: Mutex<OffsetTracker>,
    closed: AtomicBool,
}

impl KafkaBrokerConsumer {
    pub fn new(
        cluster: &KafkaClusterConfig,
        topic: impl Into<String>,
        queue: &str,
        binding: &str,
    ) -> Result<Self, BrokerError> {
        let topic = topic.into();
        let consumer: StreamConsumer = base_client_config(cluster)
            .set("group.id", queue)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|err| BrokerError::Unavailable(err.to_string()))?;
        consumer
            .subscribe(&[&topic])
            .map_err(|err| BrokerError::Unavailable(err.to_string()))?;

        info!(
            bootstrap = %cluster.bootstrap_servers,
            topic = %topic,
            group = queue,
            binding,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic,
            binding: BindingPattern::new(binding),
            pending_redelivery: Mutex::new(HashSet::new()),
            offsets: Mutex::new(OffsetTracker::default()),
            closed: AtomicBool::new(false),
        })
    }

    fn commit_offset(&self, partition: i32, next_offset: i64) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(next_offset))
            .map_err(|err| BrokerError::Acknowledge(err.to_string()))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|err| BrokerError::Acknowledge(err.to_string()))
    }

    fn track(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.offsets
            .lock()
            .map_err(|_| BrokerError::Consume("offset tracker poisoned".to_string()))?
            .begin(tag);
        Ok(())
    }

    /// 标记完成，水位前进时提交
    fn complete(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let advanced = self
            .offsets
            .lock()
            .map_err(|_| BrokerError::Acknowledge("offset tracker poisoned".to_string()))?
            .complete(tag);
        match advanced {
            Some(next_offset) => self.commit_offset(tag.partition, next_offset),
            None => Ok(()),
        }
    }

    fn take_redelivered(&self, tag: &DeliveryTag) -> bool {
        self.pending_redelivery
            .lock()
            .map(|mut pending| pending.remove(tag))
            .unwrap_or(false)
    }
}

#[async_trait]
impl BrokerConsumer for KafkaBrokerConsumer {
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let (tag, routing_key, payload) = {
                let message = self
                    .consumer
                    .recv()
                    .await
                    .map_err(|err| BrokerError::Consume(err.to_string()))?;
                let tag = DeliveryTag {
                    partition: message.partition(),
                    offset: message.offset(),
                };
                let routing_key = message
                    .key()
                    .map(|key| String::from_utf8_lossy(key).into_owned())
                    .unwrap_or_default();
                let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                (tag, routing_key, payload)
            };

            if !self.binding.matches(&routing_key) {
                debug!(routing_key = %routing_key, "record does not match binding, skipped");
                self.track(tag)?;
                self.complete(tag)?;
                continue;
            }

            self.track(tag)?;

            let redelivered = self.take_redelivered(&tag);

            return Ok(Some(Delivery {
                tag,
                routing_key,
                payload,
                redelivered,
            }));
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.complete(tag)
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        if !requeue {
            return self.complete(tag);
        }

        if let Ok(mut pending) = self.pending_redelivery.lock() {
            pending.insert(tag);
        }
        self.consumer
            .seek(
                &self.topic,
                tag.partition,
                Offset::Offset(tag.offset),
                Duration::from_secs(5),
            )
            .map_err(|err| {
                warn!(error = %err, partition = tag.partition, offset = tag.offset, "seek for redelivery failed");
                BrokerError::Acknowledge(err.to_string())
            })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka consumer unsubscribed");
        Ok(())
    }
}
