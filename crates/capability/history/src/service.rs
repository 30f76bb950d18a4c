//! 历史服务实现：写入、读取、最新值与后台任务。

use crate::cursor::ThingHistoryCursor;
use crate::keys::{RecordKind, encode_key};
use crate::latest::LatestIndex;
use crate::retention::{self, RetentionPolicy, delete_expired};
use crate::traits::{AddHistory, HistoryCursor, HistoryService, ReadHistory};
use async_trait::async_trait;
use domain::time::{millis_to_iso, now_epoch_ms, now_iso, parse_iso_millis};
use domain::{CreatedRepair, HubError, ThingAddr, ThingValue};
use hub_bucketstore::{BucketInfo, BucketStore};
use hub_pubsub::{PubSubService, ServicePubSub, ValueHandler};
use hub_telemetry::{record_history_rejected, record_history_retention_dropped, record_history_stored};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 历史服务订阅时使用的服务 ID。
pub const HISTORIAN_SERVICE_ID: &str = "history";

/// 历史服务配置。
#[derive(Debug, Clone)]
pub struct HistorianConfig {
    pub retention: RetentionPolicy,
    pub sweep_interval: Duration,
    pub retention_batch: usize,
    pub latest_flush_interval: Duration,
    /// 是否自动订阅并收录事件与动作。
    pub ingest: bool,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            sweep_interval: Duration::from_secs(3600),
            retention_batch: 500,
            latest_flush_interval: Duration::from_secs(60),
            ingest: true,
        }
    }
}

struct HistorianInner {
    store: Arc<dyn BucketStore>,
    latest: LatestIndex,
    config: HistorianConfig,
    /// 记录键序号。
    sequence: AtomicU64,
}

impl HistorianInner {
    /// 校验、修正时间、执行写入时保留规则，然后按 Thing 分桶提交。
    async fn add(
        &self,
        client_id: &str,
        scope: Option<&ThingAddr>,
        values: Vec<(ThingValue, RecordKind)>,
    ) -> Result<(), HubError> {
        for (value, _) in &values {
            if let Err(err) = value.ensure_addressed() {
                record_history_rejected();
                return Err(err);
            }
            if let Some(scope) = scope {
                if value.address() != *scope {
                    record_history_rejected();
                    return Err(HubError::not_permitted(format!(
                        "{client_id} may only add history for {scope}"
                    )));
                }
            }
        }

        let mut grouped: BTreeMap<String, (ThingAddr, BTreeMap<Vec<u8>, Vec<u8>>, Vec<ThingValue>)> =
            BTreeMap::new();
        for (mut value, kind) in values {
            let original = value.created.clone();
            match value.normalize_created() {
                CreatedRepair::Filled | CreatedRepair::Replaced => {
                    warn!(
                        target: "hub.history",
                        thing = %value.address(),
                        name = %value.name,
                        created = %original,
                        "created_repaired"
                    );
                }
                CreatedRepair::Normalized | CreatedRepair::Unchanged => {}
            }
            let millis = match value.created_millis() {
                Some(millis) if millis >= 0 => millis,
                _ => {
                    warn!(target: "hub.history", created = %value.created, "created_repaired");
                    let millis = now_epoch_ms();
                    value.created = millis_to_iso(millis).unwrap_or_else(now_iso);
                    millis
                }
            };
            if !self
                .config
                .retention
                .retain_at_ingest(&value.publisher_id, &value.thing_id, &value.name)
            {
                record_history_retention_dropped();
                debug!(target: "hub.history", name = %value.name, "retention_dropped_at_ingest");
                continue;
            }
            let addr = value.address();
            let entry = grouped
                .entry(addr.to_string())
                .or_insert_with(|| (addr, BTreeMap::new(), Vec::new()));
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            entry
                .1
                .insert(encode_key(millis, &value.name, kind, seq), value.data.clone());
            if kind == RecordKind::Event {
                entry.2.push(value);
            }
        }

        for (bucket_id, (addr, records, events)) in grouped {
            let count = records.len() as u64;
            let mut bucket = self.store.get_bucket(&bucket_id)?;
            let result = bucket.set_multiple(records).await;
            bucket.close();
            result?;
            record_history_stored(count);
            if !events.is_empty() {
                self.latest.update(&addr, &events).await?;
            }
        }
        Ok(())
    }
}

/// 写能力；`scope` 为空表示可写任意 Thing。
struct HistoryWriter {
    client_id: String,
    scope: Option<ThingAddr>,
    inner: Arc<HistorianInner>,
}

#[async_trait]
impl AddHistory for HistoryWriter {
    async fn add_event(&self, value: ThingValue) -> Result<(), HubError> {
        self.inner
            .add(&self.client_id, self.scope.as_ref(), vec![(value, RecordKind::Event)])
            .await
    }

    async fn add_action(&self, value: ThingValue) -> Result<(), HubError> {
        self.inner
            .add(&self.client_id, self.scope.as_ref(), vec![(value, RecordKind::Action)])
            .await
    }

    async fn add_events(&self, values: Vec<ThingValue>) -> Result<(), HubError> {
        let batch = values
            .into_iter()
            .map(|value| (value, RecordKind::Event))
            .collect();
        self.inner.add(&self.client_id, self.scope.as_ref(), batch).await
    }
}

/// 单个 Thing 的读能力。
struct HistoryReader {
    addr: ThingAddr,
    inner: Arc<HistorianInner>,
}

#[async_trait]
impl ReadHistory for HistoryReader {
    async fn get_event_history(&self, name: &str) -> Result<Box<dyn HistoryCursor>, HubError> {
        let mut bucket = self.inner.store.get_bucket(&self.addr.to_string())?;
        let cursor = bucket.cursor().await;
        bucket.close();
        Ok(Box::new(ThingHistoryCursor::new(cursor?, self.addr.clone(), name)))
    }

    async fn get_properties(&self, names: &[String]) -> Result<Vec<ThingValue>, HubError> {
        self.inner.latest.get(&self.addr, names).await
    }

    async fn info(&self) -> Result<BucketInfo, HubError> {
        let mut bucket = self.inner.store.get_bucket(&self.addr.to_string())?;
        let info = bucket.info().await;
        bucket.close();
        Ok(info?)
    }
}

/// 把订阅到的值写入历史。
struct HistoryIngest {
    inner: Arc<HistorianInner>,
    kind: RecordKind,
}

#[async_trait]
impl ValueHandler for HistoryIngest {
    async fn handle(&self, value: ThingValue) {
        let thing = value.address();
        let name = value.name.clone();
        if let Err(err) = self
            .inner
            .add(HISTORIAN_SERVICE_ID, None, vec![(value, self.kind)])
            .await
        {
            warn!(target: "hub.history", thing = %thing, name = %name, error = %err, "history_ingest_failed");
        }
    }
}

/// 历史服务。
pub struct Historian {
    inner: Arc<HistorianInner>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    ingest: Mutex<Option<ServicePubSub>>,
}

impl Historian {
    pub fn new(store: Arc<dyn BucketStore>, config: HistorianConfig) -> Self {
        Self {
            inner: Arc::new(HistorianInner {
                latest: LatestIndex::new(store.clone()),
                store,
                config,
                sequence: AtomicU64::new(0),
            }),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            ingest: Mutex::new(None),
        }
    }

    /// 开始自动收录（若启用）并启动最新值落盘与保留清理任务。
    pub fn start(&self, pubsub: &PubSubService) -> Result<(), HubError> {
        let lock_failed = || HubError::StoreIo("lock failed".to_string());
        let mut ingest = self.ingest.lock().map_err(|_| lock_failed())?;
        let mut tasks = self.tasks.lock().map_err(|_| lock_failed())?;
        if ingest.is_some() || !tasks.is_empty() {
            return Ok(());
        }
        if self.inner.config.ingest {
            let capability = pubsub.cap_service_pubsub(HISTORIAN_SERVICE_ID);
            capability.sub_events(Arc::new(HistoryIngest {
                inner: self.inner.clone(),
                kind: RecordKind::Event,
            }))?;
            capability.sub_actions(
                "",
                "",
                "",
                Arc::new(HistoryIngest {
                    inner: self.inner.clone(),
                    kind: RecordKind::Action,
                }),
            )?;
            *ingest = Some(capability);
        }
        tasks.push(tokio::spawn(flush_loop(
            self.inner.clone(),
            self.inner.config.latest_flush_interval,
            self.cancel.child_token(),
        )));
        if !self.inner.config.retention.is_empty() {
            tasks.push(tokio::spawn(sweep_loop(
                self.inner.clone(),
                self.inner.config.sweep_interval,
                self.cancel.child_token(),
            )));
        }
        info!(
            target: "hub.history",
            ingest = self.inner.config.ingest,
            retention_rules = self.inner.config.retention.rules().len(),
            "historian_started"
        );
        Ok(())
    }

    /// 停止收录与后台任务，并落盘最新值。
    pub async fn stop(&self) {
        if let Some(capability) = self.ingest.lock().ok().and_then(|mut ingest| ingest.take()) {
            capability.release();
        }
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            let _ = task.await;
        }
        if let Err(err) = self.flush_latest().await {
            warn!(target: "hub.history", error = %err, "latest_flush_failed");
        }
        info!(target: "hub.history", "historian_stopped");
    }

    /// 立即写出脏的最新值记录。
    pub async fn flush_latest(&self) -> Result<usize, HubError> {
        self.inner.latest.flush().await
    }

    /// 立即执行一次保留清理，返回删除条数。
    pub async fn sweep_now(&self, cancel: &CancellationToken) -> Result<u64, HubError> {
        let config = &self.inner.config;
        retention::sweep(
            &self.inner.store,
            &config.retention,
            config.retention_batch,
            now_epoch_ms(),
            cancel,
        )
        .await
    }
}

#[async_trait]
impl HistoryService for Historian {
    fn cap_add_history(
        &self,
        client_id: &str,
        publisher_id: &str,
        thing_id: &str,
    ) -> Arc<dyn AddHistory> {
        Arc::new(HistoryWriter {
            client_id: client_id.to_string(),
            scope: Some(ThingAddr::new(publisher_id, thing_id)),
            inner: self.inner.clone(),
        })
    }

    fn cap_add_any_thing(&self, client_id: &str) -> Arc<dyn AddHistory> {
        Arc::new(HistoryWriter {
            client_id: client_id.to_string(),
            scope: None,
            inner: self.inner.clone(),
        })
    }

    fn cap_read_history(
        &self,
        client_id: &str,
        publisher_id: &str,
        thing_id: &str,
    ) -> Arc<dyn ReadHistory> {
        debug!(target: "hub.history", client_id, publisher_id, thing_id, "read_capability_issued");
        Arc::new(HistoryReader {
            addr: ThingAddr::new(publisher_id, thing_id),
            inner: self.inner.clone(),
        })
    }

    async fn prune(&self, publisher_id: &str, thing_id: &str, before: &str) -> Result<u64, HubError> {
        if publisher_id.is_empty() || thing_id.is_empty() {
            return Err(HubError::invalid("publisherID and thingID are required"));
        }
        let before_ms = parse_iso_millis(before)
            .ok_or_else(|| HubError::invalid(format!("invalid timestamp: {before}")))?;
        let addr = ThingAddr::new(publisher_id, thing_id);
        let deleted = delete_expired(
            &self.inner.store,
            &addr.to_string(),
            before_ms,
            self.inner.config.retention_batch,
            &CancellationToken::new(),
            |key| key.millis < before_ms,
        )
        .await?;
        info!(target: "hub.history", thing = %addr, before, deleted, "history_pruned");
        Ok(deleted)
    }
}

async fn flush_loop(inner: Arc<HistorianInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = inner.latest.flush().await {
                    warn!(target: "hub.history", error = %err, "latest_flush_failed");
                }
            }
        }
    }
}

async fn sweep_loop(inner: Arc<HistorianInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let config = &inner.config;
                match retention::sweep(
                    &inner.store,
                    &config.retention,
                    config.retention_batch,
                    now_epoch_ms(),
                    &cancel,
                )
                .await
                {
                    Ok(deleted) => {
                        info!(target: "hub.history", deleted, "retention_sweep_completed");
                    }
                    Err(HubError::Cancelled) => break,
                    Err(err) => {
                        warn!(target: "hub.history", error = %err, "retention_sweep_failed");
                    }
                }
            }
        }
    }
}
