//! 目录服务实现。

use crate::cursor::TdCursor;
use crate::traits::{DirectoryCursor, DirectoryService, ReadDirectory, UpdateDirectory};
use async_trait::async_trait;
use domain::topic::TD_NAME;
use domain::{HubError, ThingAddr, ThingValue};
use hub_bucketstore::BucketStore;
use hub_pubsub::{PubSubService, ServicePubSub, ValueHandler};
use hub_telemetry::record_directory_update;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// 存放 TD 的桶，键为 `publisherID/thingID`。
pub const TD_BUCKET: &str = "td";
/// 目录订阅 TD 时使用的服务 ID。
pub const DIRECTORY_SERVICE_ID: &str = "directory";

/// 目录存储：读写都经过桶存储。
#[derive(Clone)]
struct TdTable {
    store: Arc<dyn BucketStore>,
}

impl TdTable {
    async fn get(&self, addr: &ThingAddr) -> Result<Option<ThingValue>, HubError> {
        let mut bucket = self.store.get_bucket(TD_BUCKET)?;
        let raw = bucket.get(addr.to_string().as_bytes()).await;
        bucket.close();
        raw?.map(|bytes| ThingValue::decode(&bytes)).transpose()
    }

    async fn put(&self, mut value: ThingValue) -> Result<(), HubError> {
        value.name = TD_NAME.to_string();
        value.ensure_addressed()?;
        let bytes = value.encode()?;
        let key = value.address().to_string();
        let mut bucket = self.store.get_bucket(TD_BUCKET)?;
        let result = bucket.set(key.as_bytes(), &bytes).await;
        bucket.close();
        result?;
        record_directory_update();
        debug!(target: "hub.directory", thing = %key, bytes = value.data.len(), "td_updated");
        Ok(())
    }

    async fn remove(&self, addr: &ThingAddr) -> Result<(), HubError> {
        let mut bucket = self.store.get_bucket(TD_BUCKET)?;
        let result = bucket.delete(addr.to_string().as_bytes()).await;
        bucket.close();
        result?;
        record_directory_update();
        debug!(target: "hub.directory", thing = %addr, "td_removed");
        Ok(())
    }

    async fn cursor(&self, publisher_id: Option<String>) -> Result<Box<dyn DirectoryCursor>, HubError> {
        let mut bucket = self.store.get_bucket(TD_BUCKET)?;
        let cursor = bucket.cursor().await;
        bucket.close();
        Ok(Box::new(TdCursor::new(cursor?, publisher_id)))
    }
}

fn address(publisher_id: &str, thing_id: &str) -> Result<ThingAddr, HubError> {
    if publisher_id.is_empty() || thing_id.is_empty() {
        return Err(HubError::invalid("publisherID and thingID are required"));
    }
    Ok(ThingAddr::new(publisher_id, thing_id))
}

/// 目录读能力。
struct DirectoryReader {
    client_id: String,
    table: TdTable,
}

#[async_trait]
impl ReadDirectory for DirectoryReader {
    async fn get_td(&self, publisher_id: &str, thing_id: &str) -> Result<ThingValue, HubError> {
        let addr = address(publisher_id, thing_id)?;
        self.table
            .get(&addr)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("td {addr}")))
    }

    async fn cursor(&self) -> Result<Box<dyn DirectoryCursor>, HubError> {
        debug!(target: "hub.directory", client_id = %self.client_id, "cursor_opened");
        self.table.cursor(None).await
    }

    async fn cursor_for_publisher(
        &self,
        publisher_id: &str,
    ) -> Result<Box<dyn DirectoryCursor>, HubError> {
        let filter = (!publisher_id.is_empty()).then(|| publisher_id.to_string());
        self.table.cursor(filter).await
    }
}

/// 目录写能力。
struct DirectoryUpdater {
    client_id: String,
    table: TdTable,
}

#[async_trait]
impl UpdateDirectory for DirectoryUpdater {
    async fn update_td(&self, publisher_id: &str, thing_id: &str, td: &[u8]) -> Result<(), HubError> {
        let addr = address(publisher_id, thing_id)?;
        debug!(target: "hub.directory", client_id = %self.client_id, thing = %addr, "update_td");
        self.table
            .put(ThingValue::new(publisher_id, thing_id, TD_NAME, td))
            .await
    }

    async fn remove_td(&self, publisher_id: &str, thing_id: &str) -> Result<(), HubError> {
        let addr = address(publisher_id, thing_id)?;
        self.table.remove(&addr).await
    }
}

/// 把订阅到的 TD 写入目录。
struct TdIngest {
    table: TdTable,
}

#[async_trait]
impl ValueHandler for TdIngest {
    async fn handle(&self, value: ThingValue) {
        let thing = value.address();
        if let Err(err) = self.table.put(value).await {
            warn!(target: "hub.directory", thing = %thing, error = %err, "td_ingest_failed");
        }
    }
}

/// 目录服务。
pub struct Directory {
    table: TdTable,
    ingest: Mutex<Option<ServicePubSub>>,
}

impl Directory {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self {
            table: TdTable { store },
            ingest: Mutex::new(None),
        }
    }

    /// 订阅 `things/+/+/td/+` 并开始自动收录。重复调用无副作用。
    pub fn start(&self, pubsub: &PubSubService) -> Result<(), HubError> {
        let mut ingest = self
            .ingest
            .lock()
            .map_err(|_| HubError::StoreIo("lock failed".to_string()))?;
        if ingest.is_some() {
            return Ok(());
        }
        let capability = pubsub.cap_service_pubsub(DIRECTORY_SERVICE_ID);
        capability.sub_tds(
            "",
            "",
            Arc::new(TdIngest {
                table: self.table.clone(),
            }),
        )?;
        *ingest = Some(capability);
        info!(target: "hub.directory", "directory_started");
        Ok(())
    }

    /// 停止收录并释放订阅。
    pub fn stop(&self) {
        let capability = match self.ingest.lock() {
            Ok(mut ingest) => ingest.take(),
            Err(_) => None,
        };
        if let Some(capability) = capability {
            capability.release();
            info!(target: "hub.directory", "directory_stopped");
        }
    }
}

impl DirectoryService for Directory {
    fn cap_read_directory(&self, client_id: &str) -> Arc<dyn ReadDirectory> {
        Arc::new(DirectoryReader {
            client_id: client_id.to_string(),
            table: self.table.clone(),
        })
    }

    fn cap_update_directory(&self, client_id: &str) -> Arc<dyn UpdateDirectory> {
        Arc::new(DirectoryUpdater {
            client_id: client_id.to_string(),
            table: self.table.clone(),
        })
    }
}
