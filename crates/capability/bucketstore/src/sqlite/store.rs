//! SQLite 桶存储。

use super::cursor::KeyListCursor;
use crate::connection::{connect_pool, ensure_schema};
use crate::error::StoreError;
use crate::handles::{HandleCounter, HandleGuard};
use crate::models::BucketInfo;
use crate::traits::{Bucket, BucketCursor, BucketStore};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub const ENGINE_SQLITE: &str = "sqlite";

const UPSERT: &str = "insert into kv (bucket, key, value) values (?, ?, ?) \
                      on conflict (bucket, key) do update set value = excluded.value";
const DELETE: &str = "delete from kv where bucket = ? and key = ?";

/// SQLite 桶存储（持久化引擎）。
pub struct SqliteBucketStore {
    pool: SqlitePool,
    path: PathBuf,
    handles: HandleCounter,
    closed: Arc<AtomicBool>,
}

impl SqliteBucketStore {
    /// 打开（必要时创建）数据库文件。
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let pool = connect_pool(&path).await?;
        ensure_schema(&pool).await?;
        info!(target: "hub.bucketstore", path = %path.display(), "sqlite_store_opened");
        Ok(Self {
            pool,
            path,
            handles: HandleCounter::new(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BucketStore for SqliteBucketStore {
    fn engine(&self) -> &'static str {
        ENGINE_SQLITE
    }

    fn get_bucket(&self, bucket_id: &str) -> Result<Box<dyn Bucket>, StoreError> {
        self.ensure_open()?;
        Ok(Box::new(SqliteBucket {
            id: bucket_id.to_string(),
            pool: self.pool.clone(),
            handles: self.handles.clone(),
            closed: self.closed.clone(),
            guard: Some(self.handles.acquire()),
        }))
    }

    async fn bucket_ids(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        let ids = sqlx::query_scalar::<_, String>("select distinct bucket from kv order by bucket")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    fn outstanding_handles(&self) -> usize {
        self.handles.outstanding()
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let open = self.handles.outstanding();
        if open > 0 {
            warn!(target: "hub.bucketstore", outstanding = open, "store_close_refused");
            return Err(StoreError::Busy(open));
        }
        self.closed.store(true, Ordering::SeqCst);
        self.pool.close().await;
        info!(target: "hub.bucketstore", path = %self.path.display(), "sqlite_store_closed");
        Ok(())
    }
}

/// SQLite 桶句柄。
pub struct SqliteBucket {
    id: String,
    pool: SqlitePool,
    handles: HandleCounter,
    closed: Arc<AtomicBool>,
    guard: Option<HandleGuard>,
}

impl SqliteBucket {
    fn ensure_usable(&self) -> Result<(), StoreError> {
        if self.guard.is_none() {
            return Err(StoreError::io(format!("bucket {} is closed", self.id)));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Bucket for SqliteBucket {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_usable()?;
        let value =
            sqlx::query_scalar::<_, Vec<u8>>("select value from kv where bucket = ? and key = ?")
                .bind(self.id.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn get_multiple(
        &self,
        keys: &[Vec<u8>],
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StoreError> {
        self.ensure_usable()?;
        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.ensure_usable()?;
        sqlx::query(UPSERT)
            .bind(self.id.as_str())
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_multiple(&self, entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StoreError> {
        self.ensure_usable()?;
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (key, value) in &entries {
            sqlx::query(UPSERT)
                .bind(self.id.as_str())
                .bind(key.as_slice())
                .bind(value.as_slice())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.ensure_usable()?;
        sqlx::query(DELETE)
            .bind(self.id.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_multiple(&self, keys: &[Vec<u8>]) -> Result<(), StoreError> {
        self.ensure_usable()?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query(DELETE)
                .bind(self.id.as_str())
                .bind(key.as_slice())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn cursor(&self) -> Result<Box<dyn BucketCursor>, StoreError> {
        self.ensure_usable()?;
        let keys =
            sqlx::query_scalar::<_, Vec<u8>>("select key from kv where bucket = ? order by key")
                .bind(self.id.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(Box::new(KeyListCursor::new(
            self.id.clone(),
            self.pool.clone(),
            keys,
            self.handles.acquire(),
        )))
    }

    async fn info(&self) -> Result<BucketInfo, StoreError> {
        self.ensure_usable()?;
        let (n_keys, data_size) = sqlx::query_as::<_, (i64, i64)>(
            "select count(*), coalesce(sum(length(key) + length(value)), 0) \
             from kv where bucket = ?",
        )
        .bind(self.id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(BucketInfo {
            id: self.id.clone(),
            n_keys: n_keys.max(0) as u64,
            data_size: data_size.max(0) as u64,
            engine: ENGINE_SQLITE.to_string(),
        })
    }

    fn close(&mut self) {
        self.guard = None;
    }
}
