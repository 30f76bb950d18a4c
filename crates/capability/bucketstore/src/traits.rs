//! 桶存储接口 Trait 定义
//!
//! - BucketStore：存储实例，按名称打开桶
//! - Bucket：单个桶的读写与批量操作
//! - BucketCursor：基于快照的有序游标
//!
//! 设计约束：
//! - 每次 `get_bucket` 必须对应一次 `close`（或 drop）
//! - 存在未释放句柄时关闭存储返回 `StoreError::Busy`
//! - 游标读取失败视为迭代结束并记录日志

use crate::error::StoreError;
use crate::models::{BucketInfo, KeyValue};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// 桶存储。
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// 引擎名称（`memory` / `sqlite`）。
    fn engine(&self) -> &'static str;

    /// 打开桶句柄；桶在首次写入时创建。
    fn get_bucket(&self, bucket_id: &str) -> Result<Box<dyn Bucket>, StoreError>;

    /// 列出已存在的桶。
    async fn bucket_ids(&self) -> Result<Vec<String>, StoreError>;

    /// 当前未释放的桶与游标数量。
    fn outstanding_handles(&self) -> usize;

    /// 关闭存储；内存引擎在此时写入快照。
    async fn close(&self) -> Result<(), StoreError>;
}

/// 单个桶。
#[async_trait]
pub trait Bucket: Send + Sync {
    fn id(&self) -> &str;

    /// 读取；缺失键返回 None。
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// 批量读取，仅返回存在的键。
    async fn get_multiple(
        &self,
        keys: &[Vec<u8>],
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StoreError>;

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// 批量写入，桶内全部成功或全部失败。
    async fn set_multiple(&self, entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StoreError>;

    /// 删除；缺失键视为成功。
    async fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// 批量删除，桶内原子。
    async fn delete_multiple(&self, keys: &[Vec<u8>]) -> Result<(), StoreError>;

    /// 基于当前快照创建游标。
    async fn cursor(&self) -> Result<Box<dyn BucketCursor>, StoreError>;

    async fn info(&self) -> Result<BucketInfo, StoreError>;

    /// 释放句柄（幂等）。
    fn close(&mut self);
}

/// 有序游标。新游标的 `next` 等同 `first`，`prev` 等同 `last`。
#[async_trait]
pub trait BucketCursor: Send {
    async fn first(&mut self) -> Option<KeyValue>;

    async fn last(&mut self) -> Option<KeyValue>;

    async fn next(&mut self) -> Option<KeyValue>;

    async fn prev(&mut self) -> Option<KeyValue>;

    /// 定位到第一个 ≥ key 的条目。
    async fn seek(&mut self, key: &[u8]) -> Option<KeyValue>;

    /// 向后读取至多 `steps` 条，第二项为是否已到末尾。
    async fn next_n(&mut self, steps: usize) -> (Vec<KeyValue>, bool) {
        let mut items = Vec::with_capacity(steps.min(1024));
        for _ in 0..steps {
            match self.next().await {
                Some(item) => items.push(item),
                None => return (items, true),
            }
        }
        (items, false)
    }

    /// 向前读取至多 `steps` 条，第二项为是否已到开头。
    async fn prev_n(&mut self, steps: usize) -> (Vec<KeyValue>, bool) {
        let mut items = Vec::with_capacity(steps.min(1024));
        for _ in 0..steps {
            match self.prev().await {
                Some(item) => items.push(item),
                None => return (items, true),
            }
        }
        (items, false)
    }

    /// 释放游标（幂等）。
    fn release(&mut self);
}
