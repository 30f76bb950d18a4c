//! 客户端记录（`clients` 桶，键为登录 ID）。

use crate::records::{delete_record, read_all, read_record, write_record};
use crate::{AuthError, hash_password};
use domain::ClientType;
use hub_bucketstore::BucketStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CLIENTS_BUCKET: &str = "clients";

/// 客户端记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    #[serde(rename = "loginID")]
    pub login_id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "clientType")]
    pub client_type: ClientType,
    #[serde(rename = "passwordHash", default)]
    pub password_hash: String,
}

/// 客户端记录存储。
#[derive(Clone)]
pub struct ClientStore {
    store: Arc<dyn BucketStore>,
}

impl ClientStore {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, login_id: &str) -> Result<Option<ClientRecord>, AuthError> {
        read_record(self.store.as_ref(), CLIENTS_BUCKET, login_id).await
    }

    pub async fn put(&self, record: &ClientRecord) -> Result<(), AuthError> {
        if record.login_id.is_empty() {
            return Err(AuthError::Internal("empty login id".to_string()));
        }
        write_record(self.store.as_ref(), CLIENTS_BUCKET, &record.login_id, record).await
    }

    /// 新增或覆盖客户端；口令以哈希保存。
    pub async fn add(
        &self,
        login_id: &str,
        display_name: &str,
        client_type: ClientType,
        password: &str,
    ) -> Result<ClientRecord, AuthError> {
        let record = ClientRecord {
            login_id: login_id.to_string(),
            display_name: display_name.to_string(),
            client_type,
            password_hash: hash_password(password)?,
        };
        self.put(&record).await?;
        Ok(record)
    }

    /// 替换口令哈希；客户端不存在时返回 `UnknownClient`。
    pub async fn set_password_hash(&self, login_id: &str, hash: String) -> Result<(), AuthError> {
        let mut record = self
            .get(login_id)
            .await?
            .ok_or_else(|| AuthError::UnknownClient(login_id.to_string()))?;
        record.password_hash = hash;
        self.put(&record).await
    }

    pub async fn remove(&self, login_id: &str) -> Result<(), AuthError> {
        delete_record(self.store.as_ref(), CLIENTS_BUCKET, login_id).await
    }

    pub async fn list(&self) -> Result<Vec<ClientRecord>, AuthError> {
        read_all(self.store.as_ref(), CLIENTS_BUCKET).await
    }
}
