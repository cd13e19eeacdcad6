//! # Prometheus 指标收集模块
//!
//! 为各个服务模块提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static DELIVERY_METRICS: Lazy<DeliveryMetrics> = Lazy::new(DeliveryMetrics::register);
static CALL_METRICS: Lazy<CallMetrics> = Lazy::new(CallMetrics::register);
static PUSH_METRICS: Lazy<PushMetrics> = Lazy::new(PushMetrics::register);

/// 消息投递管道指标（发布端 + 消费端）
pub struct DeliveryMetrics {
    /// 消费消息总数（按结果：persisted / duplicate / malformed / failed）
    pub messages_consumed_total: IntCounterVec,
    /// 单条消息处理耗时（秒）
    pub message_processing_duration_seconds: Histogram,
    /// 发布消息总数（按路由类别）
    pub messages_published_total: IntCounterVec,
    /// 发布失败次数（按路由类别）
    pub publish_failure_total: IntCounterVec,
}

impl DeliveryMetrics {
    /// 进程内唯一实例，首次访问时注册到 [`REGISTRY`]
    pub fn global() -> &'static Self {
        &DELIVERY_METRICS
    }

    fn register() -> Self {
        let messages_consumed_total = IntCounterVec::new(
            Opts::new(
                "murmur_messages_consumed_total",
                "Total number of broker deliveries handled by the consumer",
            ),
            &["outcome"],
        )
        .expect("Failed to create murmur_messages_consumed_total metric");

        let message_processing_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "murmur_message_processing_duration_seconds",
                "Per-delivery processing duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .expect("Failed to create murmur_message_processing_duration_seconds metric");

        let messages_published_total = IntCounterVec::new(
            Opts::new(
                "murmur_messages_published_total",
                "Total number of chat messages accepted by the broker",
            ),
            &["route"],
        )
        .expect("Failed to create murmur_messages_published_total metric");

        let publish_failure_total = IntCounterVec::new(
            Opts::new(
                "murmur_publish_failure_total",
                "Total number of failed publishes",
            ),
            &["route"],
        )
        .expect("Failed to create murmur_publish_failure_total metric");

        REGISTRY
            .register(Box::new(messages_consumed_total.clone()))
            .expect("Failed to register messages_consumed_total metric");
        REGISTRY
            .register(Box::new(message_processing_duration_seconds.clone()))
            .expect("Failed to register message_processing_duration_seconds metric");
        REGISTRY
            .register(Box::new(messages_published_total.clone()))
            .expect("Failed to register messages_published_total metric");
        REGISTRY
            .register(Box::new(publish_failure_total.clone()))
            .expect("Failed to register publish_failure_total metric");

        Self {
            messages_consumed_total,
            message_processing_duration_seconds,
            messages_published_total,
            publish_failure_total,
        }
    }
}


/// 群通话指标
pub struct CallMetrics {
    /// 通话操作总数（按操作与结果）
    pub call_operations_total: IntCounterVec,
    /// 当前进行中的通话数
    pub active_calls: IntGauge,
}

impl CallMetrics {
    /// 进程内唯一实例，首次访问时注册到 [`REGISTRY`]
    pub fn global() -> &'static Self {
        &CALL_METRICS
    }

    fn register() -> Self {
        let call_operations_total = IntCounterVec::new(
            Opts::new(
                "murmur_call_operations_total",
                "Total number of group call operations",
            ),
            &["operation", "outcome"],
        )
        .expect("Failed to create murmur_call_operations_total metric");

        let active_calls = IntGauge::new("murmur_active_calls", "Number of active group calls")
            .expect("Failed to create murmur_active_calls metric");

        REGISTRY
            .register(Box::new(call_operations_total.clone()))
            .expect("Failed to register call_operations_total metric");
        REGISTRY
            .register(Box::new(active_calls.clone()))
            .expect("Failed to register active_calls metric");

        Self {
            call_operations_total,
            active_calls,
        }
    }

    pub fn record(&self, operation: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "denied" };
        self.call_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }
}


/// 推送扇出指标
pub struct PushMetrics {
    /// 已推送事件数（按事件与受众）
    pub events_pushed_total: IntCounterVec,
    /// 因队列满或关闭而丢弃的事件数
    pub events_dropped_total: IntCounterVec,
}

impl PushMetrics {
    /// 进程内唯一实例，首次访问时注册到 [`REGISTRY`]
    pub fn global() -> &'static Self {
        &PUSH_METRICS
    }

    fn register() -> Self {
        let events_pushed_total = IntCounterVec::new(
            Opts::new(
                "murmur_push_events_total",
                "Total number of events pushed to live connections",
            ),
            &["event", "audience"],
        )
        .expect("Failed to create murmur_push_events_total metric");

        let events_dropped_total = IntCounterVec::new(
            Opts::new(
                "murmur_push_events_dropped_total",
                "Total number of events dropped before fan-out",
            ),
            &["event"],
        )
        .expect("Failed to create murmur_push_events_dropped_total metric");

        REGISTRY
            .register(Box::new(events_pushed_total.clone()))
            .expect("Failed to register events_pushed_total metric");
        REGISTRY
            .register(Box::new(events_dropped_total.clone()))
            .expect("Failed to register events_dropped_total metric");

        Self {
            events_pushed_total,
            events_dropped_total,
        }
    }
}


/// 以 Prometheus 文本格式导出全局注册表
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
