//! 历史记录键：`{millis:015}/{name}/{e|a}/{seq:016x}`，字典序即时间序。
//!
//! `seq` 为写入序号，同一毫秒内同名的多条记录互不覆盖。

/// 记录类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Event,
    Action,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Event => "e",
            RecordKind::Action => "a",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "e" => Some(RecordKind::Event),
            "a" => Some(RecordKind::Action),
            _ => None,
        }
    }
}

/// 解码后的记录键。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryKey {
    pub millis: i64,
    pub name: String,
    pub kind: RecordKind,
    pub seq: u64,
}

impl HistoryKey {
    pub fn encode(&self) -> Vec<u8> {
        encode_key(self.millis, &self.name, self.kind, self.seq)
    }

    /// 名称不含 `/`，先取首段时间，再从尾部依次取序号与类型。
    pub fn decode(key: &[u8]) -> Option<Self> {
        let key = std::str::from_utf8(key).ok()?;
        let (millis, rest) = key.split_once('/')?;
        let (rest, seq) = rest.rsplit_once('/')?;
        let (name, kind) = rest.rsplit_once('/')?;
        Some(Self {
            millis: millis.parse().ok()?,
            name: name.to_string(),
            kind: RecordKind::parse(kind)?,
            seq: u64::from_str_radix(seq, 16).ok()?,
        })
    }
}

pub fn encode_key(millis: i64, name: &str, kind: RecordKind, seq: u64) -> Vec<u8> {
    format!("{:015}/{}/{}/{:016x}", millis.max(0), name, kind.as_str(), seq).into_bytes()
}

/// 某时刻之前的所有键都小于该定位键。
pub fn seek_key(millis: i64) -> Vec<u8> {
    format!("{:015}", millis.max(0)).into_bytes()
}
