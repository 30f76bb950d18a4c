//! # Hub 桶存储模块
//!
//! 本模块提供按桶划分的有序键值存储抽象，目录、历史记录与认证数据都构建在它之上。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层** (`traits.rs`)：`BucketStore` / `Bucket` / `BucketCursor`
//! 2. **数据模型层** (`models.rs`)：键值对、桶统计信息
//! 3. **错误处理层** (`error.rs`)：统一的存储错误类型，可转换为 `HubError`
//! 4. **句柄计数** (`handles.rs`)：未释放的桶与游标计数，关闭存储时校验
//! 5. **连接管理层** (`connection.rs`)：SQLite 连接池
//! 6. **实现层**：
//!    - `in_memory/`：内存引擎（写时复制快照，关闭时写 JSON 快照）
//!    - `sqlite/`：SQLite 引擎（持久化，生产环境使用）
//!
//! ## 核心约束
//!
//! - 键为任意长度字节串，按字节序排序
//! - `set_multiple` 在单个桶内全部成功或全部失败
//! - 游标持有读快照，并发写入不会破坏迭代
//! - 每次 `get_bucket` 都必须 `close`（或 drop）；存在未释放句柄时关闭存储返回 `Busy`
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use hub_bucketstore::{BucketStore, SqliteBucketStore};
//!
//! let store = SqliteBucketStore::open("data/history/history.db").await?;
//! let mut bucket = store.get_bucket("dev1/sensor1")?;
//! bucket.set(b"key", b"value").await?;
//! bucket.close();
//! store.close().await?;
//! ```

pub mod connection;
pub mod error;
pub mod handles;
pub mod in_memory;
pub mod models;
pub mod sqlite;
pub mod traits;

pub use error::StoreError;
pub use handles::{HandleCounter, HandleGuard};
pub use in_memory::{MemBucket, MemBucketStore};
pub use models::{BucketInfo, KeyValue};
pub use sqlite::{SqliteBucket, SqliteBucketStore};
pub use traits::{Bucket, BucketCursor, BucketStore};

use std::path::Path;
use std::sync::Arc;

/// 按引擎名称打开存储：`memory`（JSON 快照）或 `sqlite`。
pub async fn open_store(
    engine: &str,
    path: impl AsRef<Path>,
) -> Result<Arc<dyn BucketStore>, StoreError> {
    let path = path.as_ref();
    match engine {
        in_memory::ENGINE_MEMORY => Ok(Arc::new(MemBucketStore::open(path).await?)),
        sqlite::ENGINE_SQLITE => Ok(Arc::new(SqliteBucketStore::open(path).await?)),
        other => Err(StoreError::io(format!("unknown store engine: {other}"))),
    }
}
