//! 最新值索引。
//!
//! `properties` 桶中每个 Thing 地址一条记录，内容为 `name → ThingValue` 的 JSON 对象。
//! 记录在首次访问时载入内存，更新只在内存中进行并标记为脏，由周期任务与停止流程落盘。
//! 同名条目仅在新值的 `created` 更晚时替换。

use domain::topic::PROPERTIES_NAME;
use domain::{HubError, ThingAddr, ThingValue};
use hub_bucketstore::BucketStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

pub const LATEST_BUCKET: &str = "properties";

#[derive(Default)]
struct LatestRecord {
    loaded: bool,
    revision: u64,
    persisted: u64,
    values: BTreeMap<String, ThingValue>,
}

impl LatestRecord {
    fn dirty(&self) -> bool {
        self.revision != self.persisted
    }

    fn offer(&mut self, value: ThingValue) {
        let newer = match self.values.get(&value.name) {
            Some(current) => value.created_millis() > current.created_millis(),
            None => true,
        };
        if newer {
            self.values.insert(value.name.clone(), value);
            self.revision += 1;
        }
    }
}

/// 把 `properties` 事件展开为每个属性一条值；非 JSON 对象的数据保持原样。
pub fn expand_properties(value: &ThingValue) -> Vec<ThingValue> {
    if value.name != PROPERTIES_NAME {
        return vec![value.clone()];
    }
    let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(&value.data)
    else {
        return vec![value.clone()];
    };
    map.into_iter()
        .map(|(name, property)| {
            let data = match property {
                serde_json::Value::String(text) => text.into_bytes(),
                other => other.to_string().into_bytes(),
            };
            ThingValue {
                publisher_id: value.publisher_id.clone(),
                thing_id: value.thing_id.clone(),
                name,
                data,
                created: value.created.clone(),
            }
        })
        .collect()
}

pub(crate) struct LatestIndex {
    store: Arc<dyn BucketStore>,
    records: Mutex<HashMap<String, Arc<tokio::sync::Mutex<LatestRecord>>>>,
}

impl LatestIndex {
    pub(crate) fn new(store: Arc<dyn BucketStore>) -> Self {
        Self {
            store,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &str) -> Arc<tokio::sync::Mutex<LatestRecord>> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.entry(key.to_string()).or_default().clone()
    }

    async fn load(&self, key: &str, record: &mut LatestRecord) -> Result<(), HubError> {
        if record.loaded {
            return Ok(());
        }
        let mut bucket = self.store.get_bucket(LATEST_BUCKET)?;
        let raw = bucket.get(key.as_bytes()).await;
        bucket.close();
        if let Some(bytes) = raw? {
            match serde_json::from_slice::<BTreeMap<String, ThingValue>>(&bytes) {
                Ok(values) => record.values = values,
                Err(err) => {
                    warn!(target: "hub.history", thing = key, error = %err, "latest_record_corrupt");
                }
            }
        }
        record.loaded = true;
        Ok(())
    }

    /// 合并同一 Thing 的一批值。
    pub(crate) async fn update(&self, addr: &ThingAddr, values: &[ThingValue]) -> Result<(), HubError> {
        let key = addr.to_string();
        let entry = self.entry(&key);
        let mut record = entry.lock().await;
        self.load(&key, &mut record).await?;
        for value in values {
            for expanded in expand_properties(value) {
                record.offer(expanded);
            }
        }
        Ok(())
    }

    /// 读取最新值；`names` 为空时返回全部，按名称排序。
    pub(crate) async fn get(&self, addr: &ThingAddr, names: &[String]) -> Result<Vec<ThingValue>, HubError> {
        let key = addr.to_string();
        let entry = self.entry(&key);
        let mut record = entry.lock().await;
        self.load(&key, &mut record).await?;
        if names.is_empty() {
            return Ok(record.values.values().cloned().collect());
        }
        Ok(names
            .iter()
            .filter_map(|name| record.values.get(name).cloned())
            .collect())
    }

    /// 把所有脏记录一次写入 `properties` 桶，返回写入条数。
    pub(crate) async fn flush(&self) -> Result<usize, HubError> {
        let entries: Vec<(String, Arc<tokio::sync::Mutex<LatestRecord>>)> = {
            let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            records
                .iter()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect()
        };
        let mut batch = BTreeMap::new();
        let mut flushed = Vec::new();
        for (key, entry) in entries {
            let record = entry.lock().await;
            if record.dirty() {
                let bytes = serde_json::to_vec(&record.values)
                    .map_err(|err| HubError::StoreIo(err.to_string()))?;
                batch.insert(key.into_bytes(), bytes);
                flushed.push((entry.clone(), record.revision));
            }
        }
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        let mut bucket = self.store.get_bucket(LATEST_BUCKET)?;
        let result = bucket.set_multiple(batch).await;
        bucket.close();
        result?;
        // 只确认本轮写入时的版本，写入期间的更新留待下一轮
        for (entry, revision) in flushed {
            let mut record = entry.lock().await;
            record.persisted = record.persisted.max(revision);
        }
        debug!(target: "hub.history", records = count, "latest_flushed");
        Ok(count)
    }
}
