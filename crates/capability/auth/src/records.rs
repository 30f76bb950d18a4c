//! 桶内 JSON 记录的读写辅助。

use crate::AuthError;
use hub_bucketstore::BucketStore;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) async fn read_record<T: DeserializeOwned>(
    store: &dyn BucketStore,
    bucket_id: &str,
    key: &str,
) -> Result<Option<T>, AuthError> {
    let mut bucket = store.get_bucket(bucket_id)?;
    let raw = bucket.get(key.as_bytes()).await;
    bucket.close();
    match raw? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) async fn write_record<T: Serialize>(
    store: &dyn BucketStore,
    bucket_id: &str,
    key: &str,
    record: &T,
) -> Result<(), AuthError> {
    let bytes = serde_json::to_vec(record)?;
    let mut bucket = store.get_bucket(bucket_id)?;
    let result = bucket.set(key.as_bytes(), &bytes).await;
    bucket.close();
    Ok(result?)
}

pub(crate) async fn delete_record(
    store: &dyn BucketStore,
    bucket_id: &str,
    key: &str,
) -> Result<(), AuthError> {
    let mut bucket = store.get_bucket(bucket_id)?;
    let result = bucket.delete(key.as_bytes()).await;
    bucket.close();
    Ok(result?)
}

/// 读取整桶记录；无法解析的条目跳过。
pub(crate) async fn read_all<T: DeserializeOwned>(
    store: &dyn BucketStore,
    bucket_id: &str,
) -> Result<Vec<T>, AuthError> {
    let mut bucket = store.get_bucket(bucket_id)?;
    let cursor = bucket.cursor().await;
    bucket.close();
    let mut cursor = cursor?;
    let mut records = Vec::new();
    while let Some(item) = cursor.next().await {
        match serde_json::from_slice(&item.value) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(
                    target: "hub.auth",
                    bucket = bucket_id,
                    key = %String::from_utf8_lossy(&item.key),
                    error = %err,
                    "record_decode_failed"
                );
            }
        }
    }
    cursor.release();
    Ok(records)
}
