//! 键列表游标。

use crate::handles::HandleGuard;
use crate::models::KeyValue;
use crate::traits::BucketCursor;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::warn;

enum Position {
    Unset,
    At(usize),
    BeforeFirst,
    AfterLast,
}

pub(crate) struct KeyListCursor {
    bucket_id: String,
    pool: SqlitePool,
    keys: Vec<Vec<u8>>,
    position: Position,
    guard: Option<HandleGuard>,
}

impl KeyListCursor {
    pub(crate) fn new(
        bucket_id: String,
        pool: SqlitePool,
        keys: Vec<Vec<u8>>,
        guard: HandleGuard,
    ) -> Self {
        Self {
            bucket_id,
            pool,
            keys,
            position: Position::Unset,
            guard: Some(guard),
        }
    }

    async fn load(&self, key: &[u8]) -> Result<Option<Vec<u8>>, sqlx::Error> {
        sqlx::query_scalar::<_, Vec<u8>>("select value from kv where bucket = ? and key = ?")
            .bind(self.bucket_id.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    async fn scan_forward(&mut self, mut index: usize) -> Option<KeyValue> {
        if self.guard.is_none() {
            return None;
        }
        while index < self.keys.len() {
            let key = self.keys[index].clone();
            match self.load(&key).await {
                Ok(Some(value)) => {
                    self.position = Position::At(index);
                    return Some(KeyValue::new(key, value));
                }
                Ok(None) => index += 1,
                Err(err) => {
                    warn!(
                        target: "hub.bucketstore",
                        bucket_id = %self.bucket_id,
                        error = %err,
                        "cursor_read_failed"
                    );
                    break;
                }
            }
        }
        self.position = Position::AfterLast;
        None
    }

    /// 从 `index`（含）向前扫描。
    async fn scan_backward(&mut self, index: Option<usize>) -> Option<KeyValue> {
        if self.guard.is_none() {
            return None;
        }
        let mut next = index;
        while let Some(index) = next {
            let key = self.keys[index].clone();
            match self.load(&key).await {
                Ok(Some(value)) => {
                    self.position = Position::At(index);
                    return Some(KeyValue::new(key, value));
                }
                Ok(None) => next = index.checked_sub(1),
                Err(err) => {
                    warn!(
                        target: "hub.bucketstore",
                        bucket_id = %self.bucket_id,
                        error = %err,
                        "cursor_read_failed"
                    );
                    break;
                }
            }
        }
        self.position = Position::BeforeFirst;
        None
    }

    fn last_index(&self) -> Option<usize> {
        self.keys.len().checked_sub(1)
    }
}

#[async_trait]
impl BucketCursor for KeyListCursor {
    async fn first(&mut self) -> Option<KeyValue> {
        self.scan_forward(0).await
    }

    async fn last(&mut self) -> Option<KeyValue> {
        let start = self.last_index();
        self.scan_backward(start).await
    }

    async fn next(&mut self) -> Option<KeyValue> {
        let start = match self.position {
            Position::Unset | Position::BeforeFirst => 0,
            Position::At(index) => index + 1,
            Position::AfterLast => return None,
        };
        self.scan_forward(start).await
    }

    async fn prev(&mut self) -> Option<KeyValue> {
        let start = match self.position {
            Position::Unset | Position::AfterLast => self.last_index(),
            Position::At(index) => index.checked_sub(1),
            Position::BeforeFirst => return None,
        };
        self.scan_backward(start).await
    }

    async fn seek(&mut self, key: &[u8]) -> Option<KeyValue> {
        let start = self.keys.partition_point(|candidate| candidate.as_slice() < key);
        self.scan_forward(start).await
    }

    fn release(&mut self) {
        self.guard = None;
        self.keys.clear();
        self.position = Position::AfterLast;
    }
}
