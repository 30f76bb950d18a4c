//! 内存引擎的 JSON 快照：`{bucket: {base64(key): base64(value)}}`。

use super::cursor::Entries;
use crate::error::StoreError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

type Image = BTreeMap<String, BTreeMap<String, String>>;

/// 读取快照；文件不存在时返回空集合。
pub(crate) async fn load(path: &Path) -> Result<HashMap<String, Entries>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };
    let image: Image = serde_json::from_slice(&bytes)?;
    let mut buckets = HashMap::with_capacity(image.len());
    for (bucket_id, encoded) in image {
        let mut entries = Entries::new();
        for (key, value) in encoded {
            let key = STANDARD
                .decode(key.as_bytes())
                .map_err(|err| StoreError::io(format!("snapshot key: {err}")))?;
            let value = STANDARD
                .decode(value.as_bytes())
                .map_err(|err| StoreError::io(format!("snapshot value: {err}")))?;
            entries.insert(key, value);
        }
        buckets.insert(bucket_id, entries);
    }
    Ok(buckets)
}

/// 写入临时文件后原子改名。
pub(crate) async fn save(
    path: &Path,
    buckets: &BTreeMap<String, Arc<Entries>>,
) -> Result<(), StoreError> {
    let mut image = Image::new();
    for (bucket_id, entries) in buckets {
        if entries.is_empty() {
            continue;
        }
        let encoded = entries
            .iter()
            .map(|(key, value)| (STANDARD.encode(key), STANDARD.encode(value)))
            .collect();
        image.insert(bucket_id.clone(), encoded);
    }
    let bytes = serde_json::to_vec(&image)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
