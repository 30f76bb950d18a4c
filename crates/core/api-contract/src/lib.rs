//! MQTT 服务请求/应答契约：服务主题常量与 JSON 记录。

use domain::{HubError, ThingValue};
use serde::{Deserialize, Serialize};

/// 目录读取请求主题。
pub const TOPIC_DIRECTORY_REQUEST: &str = "services/directory/action/directory";
/// 目录读取应答主题。
pub const TOPIC_DIRECTORY_REPLY: &str = "services/directory/event/directory";
/// 历史读取请求主题。
pub const TOPIC_HISTORY_REQUEST: &str = "services/history/action/history";
/// 历史读取应答主题。
pub const TOPIC_HISTORY_REPLY: &str = "services/history/event/history";
/// 最新值读取请求主题。
pub const TOPIC_LATEST_REQUEST: &str = "services/history/action/latest";
/// 最新值读取应答主题。
pub const TOPIC_LATEST_REPLY: &str = "services/history/event/latest";

/// 单次应答的默认条数上限。
pub const DEFAULT_LIMIT: usize = 1000;
/// 历史读取默认时长（秒）。
pub const DEFAULT_HISTORY_DURATION_SECONDS: u64 = 24 * 3600;

/// 服务请求主题对应的应答主题。
pub fn reply_topic(request_topic: &str) -> Option<&'static str> {
    match request_topic {
        TOPIC_DIRECTORY_REQUEST => Some(TOPIC_DIRECTORY_REPLY),
        TOPIC_HISTORY_REQUEST => Some(TOPIC_HISTORY_REPLY),
        TOPIC_LATEST_REQUEST => Some(TOPIC_LATEST_REPLY),
        _ => None,
    }
}

/// 是否为服务应答主题（客户端订阅应答时使用）。
pub fn is_reply_topic(topic: &str) -> bool {
    matches!(
        topic,
        TOPIC_DIRECTORY_REPLY | TOPIC_HISTORY_REPLY | TOPIC_LATEST_REPLY
    )
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_duration() -> u64 {
    DEFAULT_HISTORY_DURATION_SECONDS
}

/// 目录读取请求。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadDirectoryRequest {
    #[serde(rename = "publisherID", default, skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// 目录读取应答。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadDirectoryResponse {
    pub tds: Vec<ThingValue>,
    #[serde(rename = "itemsRemaining")]
    pub items_remaining: bool,
}

/// 历史读取请求。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadHistoryRequest {
    #[serde(rename = "publisherID")]
    pub publisher_id: String,
    #[serde(rename = "thingID")]
    pub thing_id: String,
    #[serde(default)]
    pub name: String,
    /// ISO-8601；缺省为当前时间前 24 小时。
    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// 历史读取应答（回显过滤条件）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadHistoryResponse {
    #[serde(rename = "publisherID")]
    pub publisher_id: String,
    #[serde(rename = "thingID")]
    pub thing_id: String,
    pub name: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
    pub duration: u64,
    pub values: Vec<ThingValue>,
    #[serde(rename = "itemsRemaining")]
    pub items_remaining: bool,
}

/// 最新值读取请求。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadLatestRequest {
    #[serde(rename = "publisherID")]
    pub publisher_id: String,
    #[serde(rename = "thingID")]
    pub thing_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
}

/// 最新值读取应答。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadLatestResponse {
    #[serde(rename = "publisherID")]
    pub publisher_id: String,
    #[serde(rename = "thingID")]
    pub thing_id: String,
    pub values: Vec<ThingValue>,
}

/// 失败应答的错误体。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: String,
    pub message: String,
}

impl ErrorReply {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&HubError> for ErrorReply {
    fn from(err: &HubError) -> Self {
        ErrorReply::new(err.kind(), err.to_string())
    }
}
