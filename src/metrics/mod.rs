//! # Prometheus 指标收集模块
//!
//! 为集群推送节点提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 全局集群指标
pub static CLUSTER_METRICS: Lazy<ClusterMetrics> = Lazy::new(ClusterMetrics::new);

/// 路由目标标签
pub const TARGET_LOCAL: &str = "local";
pub const TARGET_REMOTE: &str = "remote";
pub const TARGET_NOT_CONNECTED: &str = "not_connected";

/// 集群推送指标
pub struct ClusterMetrics {
    /// 路由请求总数（按目标）
    pub routed_total: IntCounterVec,
    /// 本地投递失败次数
    pub delivery_failures_total: IntCounter,
    /// 广播消息因无本地连接被丢弃的次数
    pub fanout_dropped_total: IntCounter,
    /// 因节点失效被清理的在线记录数
    pub evicted_presence_total: IntCounter,
    /// 后台任务失败次数（按任务）
    pub background_failures_total: IntCounterVec,
    /// 当前本地连接数
    pub local_connections: IntGauge,
    /// 当前流式输出任务数
    pub active_streams: IntGauge,
}

impl ClusterMetrics {
    pub fn new() -> Self {
        let routed_total = IntCounterVec::new(
            Opts::new("sse_routed_total", "Total number of routed push requests"),
            &["target"],
        )
        .expect("Failed to create sse_routed_total metric");

        let delivery_failures_total = IntCounter::new(
            "sse_delivery_failures_total",
            "Total number of failed local deliveries",
        )
        .expect("Failed to create sse_delivery_failures_total metric");

        let fanout_dropped_total = IntCounter::new(
            "sse_fanout_dropped_total",
            "Total number of broadcast messages without a local connection",
        )
        .expect("Failed to create sse_fanout_dropped_total metric");

        let evicted_presence_total = IntCounter::new(
            "sse_evicted_presence_total",
            "Total number of presence entries evicted for dead nodes",
        )
        .expect("Failed to create sse_evicted_presence_total metric");

        let background_failures_total = IntCounterVec::new(
            Opts::new(
                "sse_background_failures_total",
                "Total number of failed background task cycles",
            ),
            &["task"],
        )
        .expect("Failed to create sse_background_failures_total metric");

        let local_connections = IntGauge::new(
            "sse_local_connections",
            "Number of push channels held by this node",
        )
        .expect("Failed to create sse_local_connections metric");

        let active_streams = IntGauge::new(
            "sse_active_streams",
            "Number of running character-paced streams",
        )
        .expect("Failed to create sse_active_streams metric");

        // 注册指标，忽略重复注册错误
        let _ = REGISTRY.register(Box::new(routed_total.clone()));
        let _ = REGISTRY.register(Box::new(delivery_failures_total.clone()));
        let _ = REGISTRY.register(Box::new(fanout_dropped_total.clone()));
        let _ = REGISTRY.register(Box::new(evicted_presence_total.clone()));
        let _ = REGISTRY.register(Box::new(background_failures_total.clone()));
        let _ = REGISTRY.register(Box::new(local_connections.clone()));
        let _ = REGISTRY.register(Box::new(active_streams.clone()));

        Self {
            routed_total,
            delivery_failures_total,
            fanout_dropped_total,
            evicted_presence_total,
            background_failures_total,
            local_connections,
            active_streams,
        }
    }

    pub fn record_route(&self, target: &str) {
        self.routed_total.with_label_values(&[target]).inc();
    }

    pub fn record_background_failure(&self, task: &str) {
        self.background_failures_total
            .with_label_values(&[task])
            .inc();
    }
}

impl Default for ClusterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 以文本格式导出所有指标
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
