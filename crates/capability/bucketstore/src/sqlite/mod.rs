//! SQLite 桶存储实现
//!
//! 单表 `kv(bucket, key, value)`，主键 `(bucket, key)`：
//! - 写入在返回前已按 FULL 同步落盘
//! - `set_multiple` / `delete_multiple` 在单个事务内执行
//! - 游标在创建时复制键列表，值按需读取，快照后被删除的键会被跳过

mod cursor;
mod store;

pub use store::{ENGINE_SQLITE, SqliteBucket, SqliteBucketStore};
