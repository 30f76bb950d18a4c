//! 历史记录能力接口。

use async_trait::async_trait;
use domain::{HubError, ThingValue};
use hub_bucketstore::BucketInfo;
use std::sync::Arc;

/// 历史服务：按调用方与 Thing 签发能力。
#[async_trait]
pub trait HistoryService: Send + Sync {
    /// 只能写入指定 Thing 的写能力。
    fn cap_add_history(
        &self,
        client_id: &str,
        publisher_id: &str,
        thing_id: &str,
    ) -> Arc<dyn AddHistory>;

    /// 可写入任意 Thing 的写能力，仅供受信服务使用。
    fn cap_add_any_thing(&self, client_id: &str) -> Arc<dyn AddHistory>;

    fn cap_read_history(
        &self,
        client_id: &str,
        publisher_id: &str,
        thing_id: &str,
    ) -> Arc<dyn ReadHistory>;

    /// 删除 `before` 之前的记录，返回删除条数。
    async fn prune(&self, publisher_id: &str, thing_id: &str, before: &str) -> Result<u64, HubError>;
}

/// 写能力。
#[async_trait]
pub trait AddHistory: Send + Sync {
    async fn add_event(&self, value: ThingValue) -> Result<(), HubError>;

    async fn add_action(&self, value: ThingValue) -> Result<(), HubError>;

    /// 批量写入事件；先整体校验，再按 Thing 分桶提交。
    async fn add_events(&self, values: Vec<ThingValue>) -> Result<(), HubError>;
}

/// 读能力，限定一个 Thing。
#[async_trait]
pub trait ReadHistory: Send + Sync {
    /// 事件/动作游标；`name` 非空时只产出该名称的记录。
    async fn get_event_history(&self, name: &str) -> Result<Box<dyn HistoryCursor>, HubError>;

    /// 最新值；`names` 为空时返回全部。
    async fn get_properties(&self, names: &[String]) -> Result<Vec<ThingValue>, HubError>;

    async fn info(&self) -> Result<BucketInfo, HubError>;
}

/// 按时间顺序遍历单个 Thing 的记录。
#[async_trait]
pub trait HistoryCursor: Send {
    async fn first(&mut self) -> Option<ThingValue>;

    async fn last(&mut self) -> Option<ThingValue>;

    async fn next(&mut self) -> Option<ThingValue>;

    async fn prev(&mut self) -> Option<ThingValue>;

    /// 定位到第一条不早于该 ISO 时间的记录。
    async fn seek(&mut self, timestamp: &str) -> Option<ThingValue>;

    /// 读取至多 `n` 条，第二项为是否还有剩余。
    async fn next_n(&mut self, n: usize) -> (Vec<ThingValue>, bool);

    /// 同 `next_n`，但不越过 `until`（ISO 时间，含）。
    async fn next_n_until(&mut self, n: usize, until: &str) -> (Vec<ThingValue>, bool);

    /// 向前读取至多 `n` 条，第二项为是否还有更早的记录。
    async fn prev_n(&mut self, n: usize) -> (Vec<ThingValue>, bool);

    fn release(&mut self);
}
