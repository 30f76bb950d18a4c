//! 数据库连接管理
//!
//! 提供 SQLite 连接池初始化与表结构创建：
//! - connect_pool：建立 SQLite 连接池（WAL 日志，FULL 同步）
//! - ensure_schema：创建 `kv` 表
//!
//! 设计原则：
//! - 最大连接数限制为 4（单写多读）
//! - 所有 SQL 使用参数绑定

use crate::error::StoreError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;

/// 建立 SQLite 连接池
///
/// 文件不存在时创建，父目录缺失时一并创建。
///
/// # 参数
/// - `path`：数据库文件路径
///
/// # 返回
/// - `Result<SqlitePool, StoreError>`：连接池或错误
pub async fn connect_pool(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// 创建桶表：主键 (bucket, key)，BLOB 键按字节序比较。
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "create table if not exists kv (\
         bucket text not null, \
         key blob not null, \
         value blob not null, \
         primary key (bucket, key)) without rowid",
    )
    .execute(pool)
    .await?;
    Ok(())
}
