use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use murmur_im_core::metrics::DeliveryMetrics;
use murmur_im_core::{BrokerConsumer, Delivery};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::StorageWriterConfig;
use crate::domain::{DeliveryOutcome, DeliveryScope, MessageDeliveryService};

const CONSUME_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// 处理失败的指数退避，连续失败计数在所有 worker 间共享
struct FailureBackoff {
    base: Duration,
    max: Duration,
    consecutive: AtomicU32,
}

impl FailureBackoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            consecutive: AtomicU32::new(0),
        }
    }

    /// 记录一次失败并返回本次 nack 前应等待的时长
    fn on_failure(&self) -> Duration {
        let failures = self.consecutive.fetch_add(1, Ordering::Relaxed);
        let factor = 1u32 << failures.min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    fn on_success(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
    }
}

/// 存储写入消费者
///
/// 每条投递在独立任务中处理，并发数受信号量限制。
/// 成功（含坏消息）确认，处理失败退避后 nack 并重新入队。
pub struct StorageWriterConsumer {
    consumer: Arc<dyn BrokerConsumer>,
    service: Arc<MessageDeliveryService>,
    metrics: &'static DeliveryMetrics,
    backoff: Arc<FailureBackoff>,
    worker_concurrency: usize,
    shutdown_grace: Duration,
}

impl StorageWriterConsumer {
    pub fn new(
        consumer: Arc<dyn BrokerConsumer>,
        service: Arc<MessageDeliveryService>,
        config: &StorageWriterConfig,
    ) -> Self {
        Self {
            consumer,
            service,
            metrics: DeliveryMetrics::global(),
            backoff: Arc::new(FailureBackoff::new(
                Duration::from_millis(config.retry_backoff_ms),
                Duration::from_millis(config.max_retry_backoff_ms),
            )),
            worker_concurrency: config.worker_concurrency.max(1),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }

    /// 消费循环，直到收到停机信号或消费者被关闭
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(workers = self.worker_concurrency, "storage writer consumer loop started");
        let permits = Arc::new(Semaphore::new(self.worker_concurrency));
        let mut workers = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = permits.clone().acquire_owned() => {
                    permit.context("worker semaphore closed")?
                }
            };

            let delivery = tokio::select! {
                _ = shutdown.changed() => break,
                next = self.consumer.next_delivery() => match next {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => {
                        info!("broker consumer closed, leaving consume loop");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to receive delivery, backing off");
                        drop(permit);
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(CONSUME_RETRY_BACKOFF) => continue,
                        }
                    }
                }
            };

            while let Some(finished) = workers.try_join_next() {
                if let Err(err) = finished {
                    error!(error = %err, "delivery worker panicked");
                }
            }

            let consumer = self.consumer.clone();
            let service = self.service.clone();
            let metrics = self.metrics;
            let backoff = self.backoff.clone();
            workers.spawn(async move {
                let _permit = permit;
                handle_delivery(consumer.as_ref(), &service, metrics, &backoff, delivery).await;
            });
        }

        self.drain(workers).await;
        self.consumer
            .close()
            .await
            .context("failed to close broker consumer")?;
        info!("storage writer consumer stopped");
        Ok(())
    }

    /// 等待在途投递完成；超时后中止，未确认的投递由代理重新投递
    async fn drain(&self, mut workers: JoinSet<()>) {
        let in_flight = workers.len();
        if in_flight == 0 {
            return;
        }
        info!(in_flight, grace_ms = self.shutdown_grace.as_millis() as u64, "draining in-flight deliveries");

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(finished) = workers.join_next().await {
                if let Err(err) = finished {
                    error!(error = %err, "delivery worker panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = workers.len(), "shutdown grace elapsed, aborting deliveries");
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
    }
}

async fn handle_delivery(
    consumer: &dyn BrokerConsumer,
    service: &MessageDeliveryService,
    metrics: &DeliveryMetrics,
    backoff: &FailureBackoff,
    delivery: Delivery,
) {
    let scope = DeliveryScope::new(delivery);
    let timer = metrics.message_processing_duration_seconds.start_timer();

    let decoded = match scope.decode() {
        Ok(decoded) => decoded,
        Err(reason) => {
            warn!(
                routing_key = %scope.raw_routing_key,
                reason = %reason,
                "discarding malformed delivery"
            );
            record(metrics, DeliveryOutcome::Malformed.label());
            acknowledge(consumer, &scope).await;
            timer.observe_duration();
            return;
        }
    };

    match service.deliver(decoded).await {
        Ok(outcome) => {
            debug!(
                routing_key = %scope.raw_routing_key,
                redelivered = scope.redelivered,
                outcome = outcome.label(),
                elapsed_ms = scope.received_at.elapsed().as_millis() as u64,
                "delivery processed"
            );
            backoff.on_success();
            record(metrics, outcome.label());
            acknowledge(consumer, &scope).await;
        }
        Err(err) => {
            let delay = backoff.on_failure();
            error!(
                routing_key = %scope.raw_routing_key,
                error = %err,
                backoff_ms = delay.as_millis() as u64,
                "delivery processing failed, requeueing after backoff"
            );
            record(metrics, "failed");
            tokio::time::sleep(delay).await;
            if let Err(err) = consumer.nack(scope.tag, true).await {
                warn!(tag = ?scope.tag, error = %err, "failed to nack delivery");
            }
        }
    }
    timer.observe_duration();
}

async fn acknowledge(consumer: &dyn BrokerConsumer, scope: &DeliveryScope) {
    if let Err(err) = consumer.ack(scope.tag).await {
        warn!(tag = ?scope.tag, error = %err, "failed to ack delivery");
    }
}

fn record(metrics: &DeliveryMetrics, outcome: &str) {
    metrics
        .messages_consumed_total
        .with_label_values(&[outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let backoff = FailureBackoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.on_failure(), Duration::from_millis(100));
        assert_eq!(backoff.on_failure(), Duration::from_millis(200));
        assert_eq!(backoff.on_failure(), Duration::from_millis(400));
        assert_eq!(backoff.on_failure(), Duration::from_millis(500));
        for _ in 0..40 {
            assert_eq!(backoff.on_failure(), Duration::from_millis(500));
        }
    }

    #[test]
    fn success_resets_backoff() {
        let backoff = FailureBackoff::new(Duration::from_millis(50), Duration::from_secs(2));
        backoff.on_failure();
        backoff.on_failure();
        backoff.on_success();
        assert_eq!(backoff.on_failure(), Duration::from_millis(50));
    }
}
