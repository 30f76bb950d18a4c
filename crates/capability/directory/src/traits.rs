//! 目录能力接口。

use async_trait::async_trait;
use domain::{HubError, ThingValue};
use std::sync::Arc;

/// 目录服务：按调用方签发读/写能力。
pub trait DirectoryService: Send + Sync {
    fn cap_read_directory(&self, client_id: &str) -> Arc<dyn ReadDirectory>;

    fn cap_update_directory(&self, client_id: &str) -> Arc<dyn UpdateDirectory>;
}

/// 读能力。
#[async_trait]
pub trait ReadDirectory: Send + Sync {
    /// 读取 TD；不存在时返回 `NotFound`。
    async fn get_td(&self, publisher_id: &str, thing_id: &str) -> Result<ThingValue, HubError>;

    /// 遍历全部条目。
    async fn cursor(&self) -> Result<Box<dyn DirectoryCursor>, HubError>;

    /// 只遍历某个发布者的条目。
    async fn cursor_for_publisher(
        &self,
        publisher_id: &str,
    ) -> Result<Box<dyn DirectoryCursor>, HubError>;
}

/// 写能力。
#[async_trait]
pub trait UpdateDirectory: Send + Sync {
    async fn update_td(&self, publisher_id: &str, thing_id: &str, td: &[u8]) -> Result<(), HubError>;

    /// 删除 TD；不存在视为成功。
    async fn remove_td(&self, publisher_id: &str, thing_id: &str) -> Result<(), HubError>;
}

/// 目录游标，产出 `name = "td"` 的 `ThingValue`。
#[async_trait]
pub trait DirectoryCursor: Send {
    async fn first(&mut self) -> Option<ThingValue>;

    async fn next(&mut self) -> Option<ThingValue>;

    /// 读取至多 `n` 条，第二项为是否还有剩余。
    async fn next_n(&mut self, n: usize) -> (Vec<ThingValue>, bool);

    fn release(&mut self);
}
