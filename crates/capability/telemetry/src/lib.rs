//! 追踪初始化、进程级计数器与请求 ID 生成。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub values_published: u64,
    pub values_delivered: u64,
    pub dropped_backpressure: u64,
    pub rejected_not_permitted: u64,
    pub history_stored: u64,
    pub history_rejected: u64,
    pub history_retention_dropped: u64,
    pub retention_deleted: u64,
    pub directory_updates: u64,
    pub mqtt_sessions_opened: u64,
    pub mqtt_sessions_closed: u64,
    pub mqtt_requests: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    values_published: AtomicU64,
    values_delivered: AtomicU64,
    dropped_backpressure: AtomicU64,
    rejected_not_permitted: AtomicU64,
    history_stored: AtomicU64,
    history_rejected: AtomicU64,
    history_retention_dropped: AtomicU64,
    retention_deleted: AtomicU64,
    directory_updates: AtomicU64,
    mqtt_sessions_opened: AtomicU64,
    mqtt_sessions_closed: AtomicU64,
    mqtt_requests: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            values_published: AtomicU64::new(0),
            values_delivered: AtomicU64::new(0),
            dropped_backpressure: AtomicU64::new(0),
            rejected_not_permitted: AtomicU64::new(0),
            history_stored: AtomicU64::new(0),
            history_rejected: AtomicU64::new(0),
            history_retention_dropped: AtomicU64::new(0),
            retention_deleted: AtomicU64::new(0),
            directory_updates: AtomicU64::new(0),
            mqtt_sessions_opened: AtomicU64::new(0),
            mqtt_sessions_closed: AtomicU64::new(0),
            mqtt_requests: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            values_published: self.values_published.load(Ordering::Relaxed),
            values_delivered: self.values_delivered.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            rejected_not_permitted: self.rejected_not_permitted.load(Ordering::Relaxed),
            history_stored: self.history_stored.load(Ordering::Relaxed),
            history_rejected: self.history_rejected.load(Ordering::Relaxed),
            history_retention_dropped: self.history_retention_dropped.load(Ordering::Relaxed),
            retention_deleted: self.retention_deleted.load(Ordering::Relaxed),
            directory_updates: self.directory_updates.load(Ordering::Relaxed),
            mqtt_sessions_opened: self.mqtt_sessions_opened.load(Ordering::Relaxed),
            mqtt_sessions_closed: self.mqtt_sessions_closed.load(Ordering::Relaxed),
            mqtt_requests: self.mqtt_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info，`RUST_LOG` 覆盖）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录发布次数。
pub fn record_value_published() {
    metrics().values_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录投递到订阅者处理器的次数。
pub fn record_value_delivered() {
    metrics().values_delivered.fetch_add(1, Ordering::Relaxed);
}

/// 记录订阅队列溢出丢弃次数。
pub fn record_dropped_backpressure() {
    metrics().dropped_backpressure.fetch_add(1, Ordering::Relaxed);
}

/// 记录授权拒绝次数。
pub fn record_not_permitted() {
    metrics().rejected_not_permitted.fetch_add(1, Ordering::Relaxed);
}

/// 记录历史写入条数。
pub fn record_history_stored(count: u64) {
    metrics().history_stored.fetch_add(count, Ordering::Relaxed);
}

/// 记录历史拒绝次数（非法值）。
pub fn record_history_rejected() {
    metrics().history_rejected.fetch_add(1, Ordering::Relaxed);
}

/// 记录按保留策略丢弃的条数。
pub fn record_history_retention_dropped() {
    metrics()
        .history_retention_dropped
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录保留清理删除的键数量。
pub fn record_retention_deleted(count: u64) {
    metrics().retention_deleted.fetch_add(count, Ordering::Relaxed);
}

/// 记录目录更新次数。
pub fn record_directory_update() {
    metrics().directory_updates.fetch_add(1, Ordering::Relaxed);
}

/// 记录 MQTT 会话建立。
pub fn record_mqtt_session_opened() {
    metrics().mqtt_sessions_opened.fetch_add(1, Ordering::Relaxed);
}

/// 记录 MQTT 会话关闭。
pub fn record_mqtt_session_closed() {
    metrics().mqtt_sessions_closed.fetch_add(1, Ordering::Relaxed);
}

/// 记录 MQTT 服务请求次数。
pub fn record_mqtt_request() {
    metrics().mqtt_requests.fetch_add(1, Ordering::Relaxed);
}
