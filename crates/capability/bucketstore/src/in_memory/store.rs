//! 内存桶存储。

use super::cursor::{Entries, SnapshotCursor};
use super::snapshot;
use crate::error::StoreError;
use crate::handles::{HandleCounter, HandleGuard};
use crate::models::BucketInfo;
use crate::traits::{Bucket, BucketCursor, BucketStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub const ENGINE_MEMORY: &str = "memory";

fn lock_failed() -> StoreError {
    StoreError::io("lock failed")
}

/// 单个桶的数据：写入时复制，游标克隆 Arc 得到快照。
#[derive(Default)]
struct MemBucketData {
    entries: RwLock<Arc<Entries>>,
}

struct MemInner {
    buckets: RwLock<HashMap<String, Arc<MemBucketData>>>,
    handles: HandleCounter,
    closed: AtomicBool,
    snapshot_path: Option<PathBuf>,
}

impl MemInner {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn find(&self, bucket_id: &str) -> Result<Option<Arc<MemBucketData>>, StoreError> {
        let buckets = self.buckets.read().map_err(|_| lock_failed())?;
        Ok(buckets.get(bucket_id).cloned())
    }

    fn find_or_create(&self, bucket_id: &str) -> Result<Arc<MemBucketData>, StoreError> {
        if let Some(data) = self.find(bucket_id)? {
            return Ok(data);
        }
        let mut buckets = self.buckets.write().map_err(|_| lock_failed())?;
        Ok(buckets.entry(bucket_id.to_string()).or_default().clone())
    }

    fn export(&self) -> Result<BTreeMap<String, Arc<Entries>>, StoreError> {
        let buckets = self.buckets.read().map_err(|_| lock_failed())?;
        let mut image = BTreeMap::new();
        for (bucket_id, data) in buckets.iter() {
            let entries = data.entries.read().map_err(|_| lock_failed())?;
            image.insert(bucket_id.clone(), entries.clone());
        }
        Ok(image)
    }
}

/// 内存桶存储（测试与演示）。
pub struct MemBucketStore {
    inner: Arc<MemInner>,
}

impl MemBucketStore {
    /// 纯内存存储，关闭时不落盘。
    pub fn new() -> Self {
        Self::with_buckets(HashMap::new(), None)
    }

    /// 从快照文件打开（文件不存在时为空），关闭时写回同一文件。
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let loaded = snapshot::load(&path).await?;
        info!(
            target: "hub.bucketstore",
            path = %path.display(),
            buckets = loaded.len(),
            "memory_store_opened"
        );
        Ok(Self::with_buckets(loaded, Some(path)))
    }

    fn with_buckets(loaded: HashMap<String, Entries>, snapshot_path: Option<PathBuf>) -> Self {
        let buckets = loaded
            .into_iter()
            .map(|(bucket_id, entries)| {
                let data = MemBucketData {
                    entries: RwLock::new(Arc::new(entries)),
                };
                (bucket_id, Arc::new(data))
            })
            .collect();
        Self {
            inner: Arc::new(MemInner {
                buckets: RwLock::new(buckets),
                handles: HandleCounter::new(),
                closed: AtomicBool::new(false),
                snapshot_path,
            }),
        }
    }
}

impl Default for MemBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for MemBucketStore {
    fn engine(&self) -> &'static str {
        ENGINE_MEMORY
    }

    fn get_bucket(&self, bucket_id: &str) -> Result<Box<dyn Bucket>, StoreError> {
        self.inner.ensure_open()?;
        Ok(Box::new(MemBucket {
            id: bucket_id.to_string(),
            inner: self.inner.clone(),
            guard: Some(self.inner.handles.acquire()),
        }))
    }

    async fn bucket_ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.ensure_open()?;
        let buckets = self.inner.buckets.read().map_err(|_| lock_failed())?;
        let mut ids = Vec::with_capacity(buckets.len());
        for (bucket_id, data) in buckets.iter() {
            let entries = data.entries.read().map_err(|_| lock_failed())?;
            if !entries.is_empty() {
                ids.push(bucket_id.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn outstanding_handles(&self) -> usize {
        self.inner.handles.outstanding()
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let open = self.inner.handles.outstanding();
        if open > 0 {
            warn!(target: "hub.bucketstore", outstanding = open, "store_close_refused");
            return Err(StoreError::Busy(open));
        }
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(path) = &self.inner.snapshot_path {
            let image = match self.inner.export() {
                Ok(image) => image,
                Err(err) => {
                    self.inner.closed.store(false, Ordering::SeqCst);
                    return Err(err);
                }
            };
            if let Err(err) = snapshot::save(path, &image).await {
                self.inner.closed.store(false, Ordering::SeqCst);
                return Err(err);
            }
            info!(
                target: "hub.bucketstore",
                path = %path.display(),
                buckets = image.len(),
                "memory_snapshot_written"
            );
        }
        Ok(())
    }
}

/// 内存桶句柄。
pub struct MemBucket {
    id: String,
    inner: Arc<MemInner>,
    guard: Option<HandleGuard>,
}

impl MemBucket {
    fn ensure_usable(&self) -> Result<(), StoreError> {
        if self.guard.is_none() {
            return Err(StoreError::io(format!("bucket {} is closed", self.id)));
        }
        self.inner.ensure_open()
    }

    fn snapshot(&self) -> Result<Arc<Entries>, StoreError> {
        self.ensure_usable()?;
        match self.inner.find(&self.id)? {
            Some(data) => {
                let entries = data.entries.read().map_err(|_| lock_failed())?;
                Ok(entries.clone())
            }
            None => Ok(Arc::new(Entries::new())),
        }
    }

    /// 在桶写锁内修改；克隆仅在有游标持有旧快照时发生。
    fn write_entries<F>(&self, create: bool, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Entries),
    {
        self.ensure_usable()?;
        let data = if create {
            self.inner.find_or_create(&self.id)?
        } else {
            match self.inner.find(&self.id)? {
                Some(data) => data,
                None => return Ok(()),
            }
        };
        let mut entries = data.entries.write().map_err(|_| lock_failed())?;
        apply(Arc::make_mut(&mut *entries));
        Ok(())
    }
}

#[async_trait]
impl Bucket for MemBucket {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.snapshot()?.get(key).cloned())
    }

    async fn get_multiple(
        &self,
        keys: &[Vec<u8>],
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StoreError> {
        let snapshot = self.snapshot()?;
        Ok(keys
            .iter()
            .filter_map(|key| snapshot.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.write_entries(true, |entries| {
            entries.insert(key.to_vec(), value.to_vec());
        })
    }

    async fn set_multiple(&self, entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.write_entries(true, |current| current.extend(entries))
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.write_entries(false, |entries| {
            entries.remove(key);
        })
    }

    async fn delete_multiple(&self, keys: &[Vec<u8>]) -> Result<(), StoreError> {
        self.write_entries(false, |entries| {
            for key in keys {
                entries.remove(key);
            }
        })
    }

    async fn cursor(&self) -> Result<Box<dyn BucketCursor>, StoreError> {
        let snapshot = self.snapshot()?;
        Ok(Box::new(SnapshotCursor::new(
            snapshot,
            self.inner.handles.acquire(),
        )))
    }

    async fn info(&self) -> Result<BucketInfo, StoreError> {
        let snapshot = self.snapshot()?;
        let data_size = snapshot
            .iter()
            .map(|(key, value)| (key.len() + value.len()) as u64)
            .sum();
        Ok(BucketInfo {
            id: self.id.clone(),
            n_keys: snapshot.len() as u64,
            data_size,
            engine: ENGINE_MEMORY.to_string(),
        })
    }

    fn close(&mut self) {
        self.guard = None;
    }
}
