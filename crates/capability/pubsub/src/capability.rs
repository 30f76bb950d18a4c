//! 能力对象共用的校验、发布与过滤辅助。

use crate::bus::PubSubCore;
use crate::handler::ValueHandler;
use crate::subscription::{SubscriptionHandle, SubscriptionSet};
use async_trait::async_trait;
use domain::time::now_iso;
use domain::topic::{PROPERTIES_NAME, ensure_segment};
use domain::{HubError, MessageType, ThingValue, thing_topic};
use hub_auth::ThingAuthorizer;
use hub_telemetry::record_not_permitted;
use std::sync::Arc;
use tracing::warn;

/// 必填标识段：非空且不含 `/`、`+`。
pub(crate) fn require_segment(field: &str, value: &str) -> Result<(), HubError> {
    if value.is_empty() {
        return Err(HubError::invalid(format!("{field} is required")));
    }
    ensure_segment(field, value)
}

/// 授权拒绝：记录诊断日志与计数后返回 `NotPermitted`。
pub(crate) fn reject(client_id: &str, topic: &str, reason: &str) -> HubError {
    warn!(target: "hub.pubsub", client_id, topic, reason, "publish_not_permitted");
    record_not_permitted();
    HubError::not_permitted(format!("{client_id}: {reason}"))
}

/// 校验地址后发布到 `things/{pub}/{thing}/{type}/{topic_name}`；缺失的 `created` 取当前时间。
pub(crate) fn publish_value(
    core: &PubSubCore,
    msg_type: MessageType,
    topic_name: &str,
    value: &ThingValue,
) -> Result<usize, HubError> {
    require_segment("publisherID", &value.publisher_id)?;
    require_segment("thingID", &value.thing_id)?;
    ensure_segment("name", topic_name)?;
    if msg_type != MessageType::Td && topic_name.is_empty() {
        return Err(HubError::invalid("name is required"));
    }
    let topic = thing_topic(&value.publisher_id, &value.thing_id, msg_type, topic_name);
    if value.created.trim().is_empty() {
        let mut stamped = value.clone();
        stamped.created = now_iso();
        return Ok(core.publish(&topic, &stamped));
    }
    Ok(core.publish(&topic, value))
}

/// 在能力的订阅集合中登记新订阅。
pub(crate) fn subscribe(
    set: &SubscriptionSet,
    pattern: String,
    handler: Arc<dyn ValueHandler>,
) -> Result<SubscriptionHandle, HubError> {
    if set.is_released() {
        return Err(HubError::not_permitted("capability released"));
    }
    let id = set.core().subscribe(&pattern, handler)?;
    Ok(set.track(id, pattern))
}

/// 过滤保留的 `properties` 动作。
pub(crate) struct SkipProperties {
    pub(crate) inner: Arc<dyn ValueHandler>,
}

#[async_trait]
impl ValueHandler for SkipProperties {
    async fn handle(&self, value: ThingValue) {
        if value.name != PROPERTIES_NAME {
            self.inner.handle(value).await;
        }
    }
}

/// 仅投递调用者可查看的 Thing。
pub(crate) struct AclFilter {
    pub(crate) client_id: String,
    pub(crate) authorizer: Arc<dyn ThingAuthorizer>,
    pub(crate) inner: Arc<dyn ValueHandler>,
}

#[async_trait]
impl ValueHandler for AclFilter {
    async fn handle(&self, value: ThingValue) {
        if self
            .authorizer
            .can_view(&self.client_id, &value.address())
            .await
        {
            self.inner.handle(value).await;
        }
    }
}
