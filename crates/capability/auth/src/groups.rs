//! 分组与角色 ACL。
//!
//! 分组把客户端（带角色）与一组 Thing 地址关联起来。用户能看到某个 Thing，
//! 当且仅当两者同在一个分组且角色不低于 viewer；`all` 分组覆盖所有 Thing。
//! 分组记录保存在 `groups` 桶中，内存中保留一份写穿缓存供高频授权判断。

use crate::records::{delete_record, read_all, write_record};
use crate::{AuthError, ThingAuthorizer};
use async_trait::async_trait;
use domain::ThingAddr;
use hub_bucketstore::BucketStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

pub const GROUPS_BUCKET: &str = "groups";
/// 覆盖所有 Thing 的分组名。
pub const ALL_GROUP: &str = "all";

/// 分组内角色，按权限从低到高排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Manager,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "viewer" => Some(Role::Viewer),
            "operator" => Some(Role::Operator),
            "manager" => Some(Role::Manager),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// 分组记录。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub members: BTreeMap<String, Role>,
    /// `publisherID/thingID` 地址集合。
    #[serde(default)]
    pub things: BTreeSet<String>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn covers(&self, addr: &str) -> bool {
        self.name == ALL_GROUP || self.things.contains(addr)
    }
}

/// 分组存储 + 授权判断。
pub struct GroupAcl {
    store: Arc<dyn BucketStore>,
    groups: RwLock<HashMap<String, Group>>,
}

impl GroupAcl {
    /// 从存储加载全部分组。
    pub async fn open(store: Arc<dyn BucketStore>) -> Result<Self, AuthError> {
        let loaded: Vec<Group> = read_all(store.as_ref(), GROUPS_BUCKET).await?;
        let groups = loaded
            .into_iter()
            .map(|group| (group.name.clone(), group))
            .collect();
        Ok(Self {
            store,
            groups: RwLock::new(groups),
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<Group>, AuthError> {
        let groups = self.groups.read().map_err(|_| lock_failed())?;
        Ok(groups.get(name).cloned())
    }

    pub fn list(&self) -> Result<Vec<Group>, AuthError> {
        let groups = self.groups.read().map_err(|_| lock_failed())?;
        let mut list: Vec<Group> = groups.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    /// 设置分组内角色；分组不存在时创建。
    pub async fn set_role(&self, group: &str, client_id: &str, role: Role) -> Result<(), AuthError> {
        self.update(group, |record| {
            record.members.insert(client_id.to_string(), role);
        })
        .await
    }

    pub async fn remove_member(&self, group: &str, client_id: &str) -> Result<(), AuthError> {
        self.update(group, |record| {
            record.members.remove(client_id);
        })
        .await
    }

    pub async fn add_thing(&self, group: &str, addr: &ThingAddr) -> Result<(), AuthError> {
        let key = addr.to_string();
        self.update(group, |record| {
            record.things.insert(key);
        })
        .await
    }

    pub async fn remove_thing(&self, group: &str, addr: &ThingAddr) -> Result<(), AuthError> {
        let key = addr.to_string();
        self.update(group, |record| {
            record.things.remove(&key);
        })
        .await
    }

    pub async fn delete_group(&self, group: &str) -> Result<(), AuthError> {
        delete_record(self.store.as_ref(), GROUPS_BUCKET, group).await?;
        let mut groups = self.groups.write().map_err(|_| lock_failed())?;
        groups.remove(group);
        Ok(())
    }

    /// 从所有分组中移除客户端。
    pub async fn remove_client(&self, client_id: &str) -> Result<(), AuthError> {
        let names: Vec<String> = {
            let groups = self.groups.read().map_err(|_| lock_failed())?;
            groups
                .values()
                .filter(|group| group.members.contains_key(client_id))
                .map(|group| group.name.clone())
                .collect()
        };
        for name in names {
            self.remove_member(&name, client_id).await?;
        }
        Ok(())
    }

    /// 客户端对 Thing 的最高角色。
    pub fn role_for(&self, client_id: &str, addr: &ThingAddr) -> Option<Role> {
        let key = addr.to_string();
        let groups = self.groups.read().ok()?;
        groups
            .values()
            .filter(|group| group.covers(&key))
            .filter_map(|group| group.members.get(client_id).copied())
            .max()
    }

    async fn update<F>(&self, group: &str, apply: F) -> Result<(), AuthError>
    where
        F: FnOnce(&mut Group),
    {
        if group.is_empty() {
            return Err(AuthError::Internal("empty group name".to_string()));
        }
        let mut record = self.get(group)?.unwrap_or_else(|| Group::new(group));
        apply(&mut record);
        write_record(self.store.as_ref(), GROUPS_BUCKET, group, &record).await?;
        let mut groups = self.groups.write().map_err(|_| lock_failed())?;
        groups.insert(group.to_string(), record);
        Ok(())
    }
}

#[async_trait]
impl ThingAuthorizer for GroupAcl {
    async fn can_view(&self, client_id: &str, addr: &ThingAddr) -> bool {
        self.role_for(client_id, addr).is_some()
    }

    async fn can_operate(&self, client_id: &str, addr: &ThingAddr) -> bool {
        self.role_for(client_id, addr)
            .is_some_and(|role| role >= Role::Operator)
    }
}

fn lock_failed() -> AuthError {
    AuthError::Internal("lock failed".to_string())
}
