//! 内存桶存储实现
//!
//! - 每个桶是写时复制的有序 map（`Arc<BTreeMap>`），游标持有不可变快照
//! - 关闭时（可选）将全部桶写入单个 JSON 快照文件，打开时加载
//! - 主要用于测试；持久化生产场景使用 SQLite 引擎

mod cursor;
mod snapshot;
mod store;

pub use store::{ENGINE_MEMORY, MemBucket, MemBucketStore};
