//! 数据模型
//!
//! - KeyValue：游标返回的键值对
//! - BucketInfo：桶统计信息

use serde::Serialize;

/// 键值对（键按字节序排序）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    /// 键的 UTF-8 视图。
    pub fn key_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.key).ok()
    }
}

/// 桶统计信息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketInfo {
    pub id: String,
    #[serde(rename = "nKeys")]
    pub n_keys: u64,
    #[serde(rename = "dataSize")]
    pub data_size: u64,
    pub engine: String,
}
