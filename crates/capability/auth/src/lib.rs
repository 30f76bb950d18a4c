//! 认证与授权能力：
//! - 口令认证（Argon2，兼容遗留明文并在登录时升级）
//! - 客户端证书认证（CN 为客户端 ID，OU 决定设备/服务身份）
//! - 分组角色 ACL（供发布/订阅核心与 MQTT 请求处理使用）

mod clients;
mod groups;
mod password;
mod records;

use async_trait::async_trait;
use domain::{ClientIdentity, ClientType, HubError, ThingAddr};
use hub_bucketstore::{BucketStore, StoreError};
use std::sync::Arc;
use tracing::{info, warn};

pub use clients::{CLIENTS_BUCKET, ClientRecord, ClientStore};
pub use groups::{ALL_GROUP, GROUPS_BUCKET, Group, GroupAcl, Role};
pub use password::{PasswordCheck, hash_password, is_hashed, verify_password_and_maybe_upgrade};

/// 认证相关错误。
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unknown client: {0}")]
    UnknownClient(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<AuthError> for HubError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => HubError::not_permitted("invalid credentials"),
            AuthError::UnknownClient(id) => HubError::NotFound(format!("client {id}")),
            AuthError::Internal(message) => HubError::StoreIo(message),
        }
    }
}

/// 连接时提交的凭据。
#[derive(Debug, Clone)]
pub enum Credentials {
    /// 用户名（登录 ID）+ 口令。
    Password { login_id: String, password: String },
    /// 前端已校验过的客户端证书主题。
    Certificate {
        common_name: String,
        organizational_unit: Option<String>,
    },
}

/// 认证能力 trait，便于替换实现与测试。
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<ClientIdentity, AuthError>;
}

/// Thing 级授权判断。
#[async_trait]
pub trait ThingAuthorizer: Send + Sync {
    /// 是否可查看该 Thing 的事件、TD 与历史。
    async fn can_view(&self, client_id: &str, addr: &ThingAddr) -> bool;

    /// 是否可向该 Thing 发送动作。
    async fn can_operate(&self, client_id: &str, addr: &ThingAddr) -> bool;
}

/// 不做限制的授权器（单机调试与测试）。
pub struct AllowAll;

#[async_trait]
impl ThingAuthorizer for AllowAll {
    async fn can_view(&self, _client_id: &str, _addr: &ThingAddr) -> bool {
        true
    }

    async fn can_operate(&self, _client_id: &str, _addr: &ThingAddr) -> bool {
        true
    }
}

/// 认证服务实现（基于客户端记录 + 分组 ACL）。
pub struct AuthService {
    clients: ClientStore,
    acl: Arc<GroupAcl>,
}

impl AuthService {
    /// 在给定存储上打开认证服务。
    pub async fn open(store: Arc<dyn BucketStore>) -> Result<Self, AuthError> {
        let acl = GroupAcl::open(store.clone()).await?;
        Ok(Self {
            clients: ClientStore::new(store),
            acl: Arc::new(acl),
        })
    }

    pub fn clients(&self) -> &ClientStore {
        &self.clients
    }

    /// 分组 ACL，同时作为 `ThingAuthorizer` 交给发布/订阅核心。
    pub fn acl(&self) -> Arc<GroupAcl> {
        self.acl.clone()
    }

    /// 口令登录。
    pub async fn login(&self, login_id: &str, password: &str) -> Result<ClientIdentity, AuthError> {
        let record = self
            .clients
            .get(login_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let check = verify_password_and_maybe_upgrade(&record.password_hash, password)?;
        if !check.verified {
            return Err(AuthError::InvalidCredentials);
        }
        if let Some(hash) = check.upgrade_hash {
            self.clients.set_password_hash(login_id, hash).await?;
            info!(target: "hub.auth", login_id, "password_hash_upgraded");
        }
        Ok(ClientIdentity::new(record.login_id, record.client_type))
    }

    /// 新增客户端。
    pub async fn add_client(
        &self,
        login_id: &str,
        display_name: &str,
        client_type: ClientType,
        password: &str,
    ) -> Result<ClientRecord, AuthError> {
        let record = self
            .clients
            .add(login_id, display_name, client_type, password)
            .await?;
        info!(target: "hub.auth", login_id, client_type = %client_type, "client_added");
        Ok(record)
    }

    /// 管理操作：重置口令。
    pub async fn set_password(&self, login_id: &str, password: &str) -> Result<(), AuthError> {
        let hash = hash_password(password)?;
        self.clients.set_password_hash(login_id, hash).await?;
        info!(target: "hub.auth", login_id, "password_set");
        Ok(())
    }

    /// 管理操作：设置分组角色。
    pub async fn set_role(&self, group: &str, client_id: &str, role: Role) -> Result<(), AuthError> {
        self.acl.set_role(group, client_id, role).await?;
        info!(target: "hub.auth", group, client_id, role = ?role, "role_set");
        Ok(())
    }

    /// 管理操作：把 Thing 加入分组。
    pub async fn add_thing(&self, group: &str, addr: &ThingAddr) -> Result<(), AuthError> {
        self.acl.add_thing(group, addr).await?;
        info!(target: "hub.auth", group, thing = %addr, "thing_added");
        Ok(())
    }

    /// 管理操作：删除客户端及其分组成员关系。
    pub async fn remove_client(&self, login_id: &str) -> Result<(), AuthError> {
        self.clients.remove(login_id).await?;
        self.acl.remove_client(login_id).await?;
        info!(target: "hub.auth", login_id, "client_removed");
        Ok(())
    }

    /// 确保存在 `admin` 用户并拥有 `all` 分组的 admin 角色。
    pub async fn bootstrap_admin(&self, password: &str) -> Result<(), AuthError> {
        match self.clients.get("admin").await? {
            Some(_) => self.set_password("admin", password).await?,
            None => {
                self.add_client("admin", "Administrator", ClientType::User, password)
                    .await?;
            }
        }
        self.acl.set_role(ALL_GROUP, "admin", Role::Admin).await
    }
}

#[async_trait]
impl Authenticator for AuthService {
    async fn authenticate(&self, credentials: &Credentials) -> Result<ClientIdentity, AuthError> {
        match credentials {
            Credentials::Password { login_id, password } => {
                let result = self.login(login_id, password).await;
                if result.is_err() {
                    warn!(target: "hub.auth", login_id = %login_id, "password_login_failed");
                }
                result
            }
            Credentials::Certificate {
                common_name,
                organizational_unit,
            } => certificate_identity(common_name, organizational_unit.as_deref()),
        }
    }
}

/// 证书身份：CN 为客户端 ID，OU 为 `device`/`service` 时取对应类型，否则视为用户。
pub fn certificate_identity(
    common_name: &str,
    organizational_unit: Option<&str>,
) -> Result<ClientIdentity, AuthError> {
    if common_name.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }
    let client_type = match organizational_unit.and_then(ClientType::parse) {
        Some(ClientType::Device) => ClientType::Device,
        Some(ClientType::Service) => ClientType::Service,
        _ => ClientType::User,
    };
    Ok(ClientIdentity::new(common_name, client_type))
}
