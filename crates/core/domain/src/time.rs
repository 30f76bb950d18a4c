//! 时间戳工具：ISO-8601 解析与规范化输出。

use chrono::{DateTime, SecondsFormat, Utc};

/// 当前 Unix 毫秒时间。
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// 规范格式：UTC、毫秒精度、`Z` 结尾。
pub fn format_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 当前时间的规范 ISO 字符串。
pub fn now_iso() -> String {
    format_iso(Utc::now())
}

/// Unix 毫秒转规范 ISO 字符串，超出 chrono 可表示范围时返回 None。
pub fn millis_to_iso(ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(ms).map(format_iso)
}

/// 解析 ISO-8601 时间戳（RFC 3339 以及 `±hhmm` 偏移写法）。
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    None
}

/// 解析为 Unix 毫秒。
pub fn parse_iso_millis(value: &str) -> Option<i64> {
    parse_iso(value).map(|ts| ts.timestamp_millis())
}
