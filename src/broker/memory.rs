//! 进程内 topic 交换机（用于开发和单测阶段）
//!
//! 与 AMQP 语义保持一致：
//! - 发布时复制到所有绑定模式匹配的队列，无匹配队列时丢弃
//! - 队列在消费者关闭后仍保留消息（持久队列）
//! - nack(requeue) 放回队首并标记 redelivered
//! - 消费者关闭时未确认消息放回队首

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::routing::BindingPattern;
use super::{BrokerConsumer, BrokerError, BrokerPublisher, Delivery, DeliveryTag};

#[derive(Debug, Clone)]
struct QueuedMessage {
    offset: i64,
    routing_key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    bindings: Vec<BindingPattern>,
    ready: VecDeque<QueuedMessage>,
    unacked: HashMap<i64, QueuedMessage>,
}

struct Queue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 进程内交换机
#[derive(Clone)]
pub struct InMemoryExchange {
    name: String,
    queues: Arc<Mutex<HashMap<String, Arc<Queue>>>>,
    sequence: Arc<AtomicI64>,
    available: Arc<AtomicBool>,
}

impl InMemoryExchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queues: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicI64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, Arc<Queue>>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 声明持久队列并绑定模式（幂等）
    pub fn declare_queue(&self, queue: &str, binding: &str) {
        let pattern = BindingPattern::new(binding);
        let mut queues = self.queues();
        let entry = queues.entry(queue.to_string()).or_insert_with(|| {
            Arc::new(Queue {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            })
        });
        let mut state = entry.lock();
        if !state.bindings.contains(&pattern) {
            debug!(exchange = %self.name, queue, binding, "queue bound");
            state.bindings.push(pattern);
        }
    }

    /// 为队列创建一个消费者（同一队列上的多个消费者竞争消费）
    pub fn consumer(&self, queue: &str) -> Result<InMemoryConsumer, BrokerError> {
        let queue_ref = self
            .queues()
            .get(queue)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        Ok(InMemoryConsumer {
            queue: queue_ref,
            closed: AtomicBool::new(false),
            holding: Mutex::new(Vec::new()),
        })
    }

    /// 模拟代理不可达
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 就绪（未投递）消息数
    pub fn ready_count(&self, queue: &str) -> usize {
        self.queues()
            .get(queue)
            .map(|q| q.lock().ready.len())
            .unwrap_or(0)
    }

    /// 已投递未确认消息数
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.queues()
            .get(queue)
            .map(|q| q.lock().unacked.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BrokerPublisher for InMemoryExchange {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable(format!(
                "exchange {} is not reachable",
                self.name
            )));
        }

        let targets: Vec<Arc<Queue>> = self.queues().values().cloned().collect();
        let mut routed = 0usize;
        for queue in targets {
            let mut state = queue.lock();
            if !state.bindings.iter().any(|b| b.matches(routing_key)) {
                continue;
            }
            let offset = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            state.ready.push_back(QueuedMessage {
                offset,
                routing_key: routing_key.to_string(),
                payload: payload.clone(),
                redelivered: false,
            });
            drop(state);
            queue.notify.notify_waiters();
            routed += 1;
        }

        if routed == 0 {
            warn!(exchange = %self.name, routing_key, "message unroutable, dropped");
        }
        Ok(())
    }
}

/// 进程内队列消费者
pub struct InMemoryConsumer {
    queue: Arc<Queue>,
    closed: AtomicBool,
    /// 本消费者持有的未确认投递
    holding: Mutex<Vec<i64>>,
}

impl InMemoryConsumer {
    fn holding(&self) -> MutexGuard<'_, Vec<i64>> {
        self.holding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, offset: i64) {
        self.holding().retain(|held| *held != offset);
    }
}

#[async_trait]
impl BrokerConsumer for InMemoryConsumer {
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            {
                let mut state = self.queue.lock();
                if let Some(message) = state.ready.pop_front() {
                    let delivery = Delivery {
                        tag: DeliveryTag {
                            partition: 0,
                            offset: message.offset,
                        },
                        routing_key: message.routing_key.clone(),
                        payload: message.payload.clone(),
                        redelivered: message.redelivered,
                    };
                    state.unacked.insert(message.offset, message);
                    drop(state);
                    self.holding().push(delivery.tag.offset);
                    return Ok(Some(delivery));
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let removed = self.queue.lock().unacked.remove(&tag.offset);
        self.release(tag.offset);
        removed.map(|_| ()).ok_or(BrokerError::UnknownDelivery(tag))
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.queue.lock();
        let mut message = state
            .unacked
            .remove(&tag.offset)
            .ok_or(BrokerError::UnknownDelivery(tag))?;
        if requeue {
            message.redelivered = true;
            state.ready.push_front(message);
        }
        drop(state);
        self.release(tag.offset);
        self.queue.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let held: Vec<i64> = std::mem::take(&mut *self.holding());
        let mut state = self.queue.lock();
        // 逆序放回队首，保持原有顺序
        let mut returned: Vec<QueuedMessage> = held
            .into_iter()
            .filter_map(|offset| state.unacked.remove(&offset))
            .collect();
        returned.sort_by_key(|m| m.offset);
        for mut message in returned.into_iter().rev() {
            message.redelivered = true;
            state.ready.push_front(message);
        }
        drop(state);
        self.queue.notify.notify_waiters();
        Ok(())
    }
}
