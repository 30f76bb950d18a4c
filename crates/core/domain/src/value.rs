//! ThingValue 信封：事件、动作与 TD 在组件之间传递的统一载体。

use crate::address::ThingAddr;
use crate::error::HubError;
use crate::time::{format_iso, now_iso, parse_iso};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 非 UTF-8 数据的编码标记。
pub const ENCODING_BASE64: &str = "base64";

/// 事件/动作/TD 信封。
///
/// `data` 为不透明字节，跨组件传递时整体克隆，发送方可复用自己的缓冲区。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThingValue {
    pub publisher_id: String,
    pub thing_id: String,
    pub name: String,
    pub data: Vec<u8>,
    pub created: String,
}

/// `created` 规范化结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatedRepair {
    /// 已是规范格式。
    Unchanged,
    /// 可解析，已改写为规范格式。
    Normalized,
    /// 缺失，已填入当前时间。
    Filled,
    /// 无法解析，已替换为当前时间。
    Replaced,
}

impl ThingValue {
    /// 构造新值，`created` 取当前时间。
    pub fn new(
        publisher_id: impl Into<String>,
        thing_id: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            publisher_id: publisher_id.into(),
            thing_id: thing_id.into(),
            name: name.into(),
            data: data.into(),
            created: now_iso(),
        }
    }

    pub fn with_created(mut self, created: impl Into<String>) -> Self {
        self.created = created.into();
        self
    }

    /// Thing 地址 `publisherID/thingID`。
    pub fn address(&self) -> ThingAddr {
        ThingAddr::new(&self.publisher_id, &self.thing_id)
    }

    /// 数据载荷的 UTF-8 视图。
    pub fn data_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// `created` 的 Unix 毫秒，无法解析时为 None。
    pub fn created_millis(&self) -> Option<i64> {
        parse_iso(&self.created).map(|ts| ts.timestamp_millis())
    }

    /// 将 `created` 改写为规范格式；缺失或无法解析时使用当前时间。
    pub fn normalize_created(&mut self) -> CreatedRepair {
        if self.created.trim().is_empty() {
            self.created = now_iso();
            return CreatedRepair::Filled;
        }
        match parse_iso(&self.created) {
            Some(ts) => {
                let canonical = format_iso(ts);
                if canonical == self.created {
                    CreatedRepair::Unchanged
                } else {
                    self.created = canonical;
                    CreatedRepair::Normalized
                }
            }
            None => {
                self.created = now_iso();
                CreatedRepair::Replaced
            }
        }
    }

    /// 校验事件/动作必填字段。
    pub fn ensure_addressed(&self) -> Result<(), HubError> {
        if self.publisher_id.is_empty() {
            return Err(HubError::invalid("missing publisherID"));
        }
        if self.thing_id.is_empty() {
            return Err(HubError::invalid("missing thingID"));
        }
        if self.name.is_empty() {
            return Err(HubError::invalid("missing name"));
        }
        Ok(())
    }

    /// 序列化为 JSON 字节。
    pub fn encode(&self) -> Result<Vec<u8>, HubError> {
        serde_json::to_vec(self).map_err(|err| HubError::invalid(err.to_string()))
    }

    /// 从 JSON 字节解析。
    pub fn decode(bytes: &[u8]) -> Result<Self, HubError> {
        serde_json::from_slice(bytes).map_err(|err| HubError::invalid(err.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct ThingValueWire {
    #[serde(rename = "publisherID", default)]
    publisher_id: String,
    #[serde(rename = "thingID", default)]
    thing_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
    #[serde(default)]
    created: String,
}

impl Serialize for ThingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (data, encoding) = match std::str::from_utf8(&self.data) {
            Ok(text) => (text.to_string(), None),
            Err(_) => (STANDARD.encode(&self.data), Some(ENCODING_BASE64.to_string())),
        };
        ThingValueWire {
            publisher_id: self.publisher_id.clone(),
            thing_id: self.thing_id.clone(),
            name: self.name.clone(),
            data,
            encoding,
            created: self.created.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ThingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = ThingValueWire::deserialize(deserializer)?;
        let data = match wire.encoding.as_deref() {
            None => wire.data.into_bytes(),
            Some(ENCODING_BASE64) => STANDARD
                .decode(wire.data.as_bytes())
                .map_err(serde::de::Error::custom)?,
            Some(other) => {
                return Err(serde::de::Error::custom(format!(
                    "unsupported data encoding: {other}"
                )));
            }
        };
        Ok(ThingValue {
            publisher_id: wire.publisher_id,
            thing_id: wire.thing_id,
            name: wire.name,
            data,
            created: wire.created,
        })
    }
}
