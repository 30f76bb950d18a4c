//! Thing 主题：`things/{publisherID}/{thingID}/{msgType}/{name}`。

use crate::error::HubError;
use std::fmt;

/// Thing 主题前缀。
pub const THINGS_PREFIX: &str = "things";
/// 单层通配符。
pub const WILDCARD: &str = "+";
/// TD 消息的保留名称。
pub const TD_NAME: &str = "td";
/// 属性事件/动作的保留名称。
pub const PROPERTIES_NAME: &str = "properties";

/// 消息类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Event,
    Action,
    Td,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Event => "event",
            MessageType::Action => "action",
            MessageType::Td => "td",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "event" => Some(MessageType::Event),
            "action" => Some(MessageType::Action),
            "td" => Some(MessageType::Td),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解析后的 Thing 主题，字段可能为 `+`（订阅模式）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThingTopic {
    pub publisher_id: String,
    pub thing_id: String,
    pub msg_type: MessageType,
    pub name: String,
}

impl ThingTopic {
    /// 解析五段式 Thing 主题，格式不符返回 None。
    pub fn parse(topic: &str) -> Option<Self> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() != 5 || segments[0] != THINGS_PREFIX {
            return None;
        }
        let msg_type = MessageType::parse(segments[3])?;
        Some(Self {
            publisher_id: segments[1].to_string(),
            thing_id: segments[2].to_string(),
            msg_type,
            name: segments[4].to_string(),
        })
    }

    pub fn has_wildcard(&self) -> bool {
        self.publisher_id == WILDCARD || self.thing_id == WILDCARD || self.name == WILDCARD
    }
}

impl fmt::Display for ThingTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            THINGS_PREFIX, self.publisher_id, self.thing_id, self.msg_type, self.name
        )
    }
}

/// 具体发布主题。
pub fn thing_topic(publisher_id: &str, thing_id: &str, msg_type: MessageType, name: &str) -> String {
    format!("{THINGS_PREFIX}/{publisher_id}/{thing_id}/{msg_type}/{name}")
}

/// 订阅模式：空字段替换为 `+`。
pub fn thing_pattern(publisher_id: &str, thing_id: &str, msg_type: MessageType, name: &str) -> String {
    thing_topic(
        or_wildcard(publisher_id),
        or_wildcard(thing_id),
        msg_type,
        or_wildcard(name),
    )
}

fn or_wildcard(segment: &str) -> &str {
    if segment.is_empty() { WILDCARD } else { segment }
}

/// 主题段不得包含层级分隔符或通配符。
pub fn ensure_segment(field: &str, value: &str) -> Result<(), HubError> {
    if value.contains('/') || value.contains('+') {
        return Err(HubError::invalid(format!(
            "{field} must not contain '/' or '+': {value}"
        )));
    }
    Ok(())
}
