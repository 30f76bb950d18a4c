//! 设备能力：只能以自身 ID 发布事件与 TD，只能订阅发给自己的动作。

use crate::capability::{SkipProperties, publish_value, reject, require_segment, subscribe};
use crate::bus::PubSubCore;
use crate::handler::ValueHandler;
use crate::subscription::{SubscriptionHandle, SubscriptionSet};
use domain::topic::{PROPERTIES_NAME, TD_NAME, ensure_segment};
use domain::{HubError, MessageType, ThingValue, thing_pattern, thing_topic};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct DevicePubSub {
    device_id: String,
    subscriptions: SubscriptionSet,
}

impl DevicePubSub {
    pub(crate) fn new(device_id: String, core: Arc<PubSubCore>) -> Self {
        Self {
            device_id,
            subscriptions: SubscriptionSet::new(core),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// 发布事件，`created` 取当前时间。
    pub fn pub_event(
        &self,
        thing_id: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), HubError> {
        self.publish(
            MessageType::Event,
            name,
            ThingValue::new(&self.device_id, thing_id, name, data),
        )
    }

    /// 发布 TD，主题名段为空。
    pub fn pub_td(&self, thing_id: &str, td: impl Into<Vec<u8>>) -> Result<(), HubError> {
        self.pub_td_typed(thing_id, "", td)
    }

    /// 发布 TD，主题名段为设备类型。
    pub fn pub_td_typed(
        &self,
        thing_id: &str,
        device_type: &str,
        td: impl Into<Vec<u8>>,
    ) -> Result<(), HubError> {
        self.publish(
            MessageType::Td,
            device_type,
            ThingValue::new(&self.device_id, thing_id, TD_NAME, td),
        )
    }

    /// 发布 `properties` 事件，数据为属性名到值的 JSON 对象。
    pub fn pub_properties(
        &self,
        thing_id: &str,
        properties: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), HubError> {
        let body = serde_json::to_vec(properties)
            .map_err(|err| HubError::invalid(format!("properties: {err}")))?;
        self.pub_event(thing_id, PROPERTIES_NAME, body)
    }

    /// 发布已构造的值（保留其 `created`）。发布者必须是本设备，且不能发布动作。
    pub fn publish(
        &self,
        msg_type: MessageType,
        topic_name: &str,
        mut value: ThingValue,
    ) -> Result<(), HubError> {
        let topic = thing_topic(&value.publisher_id, &value.thing_id, msg_type, topic_name);
        if msg_type == MessageType::Action {
            return Err(reject(&self.device_id, &topic, "devices may not publish actions"));
        }
        if value.publisher_id != self.device_id {
            return Err(reject(&self.device_id, &topic, "publisher differs from device"));
        }
        if msg_type == MessageType::Td {
            value.name = TD_NAME.to_string();
        }
        publish_value(self.subscriptions.core(), msg_type, topic_name, &value)?;
        Ok(())
    }

    /// 订阅发给本设备 Thing 的动作；空参数为通配。不投递保留的 `properties` 动作。
    pub fn sub_action(
        &self,
        thing_id: &str,
        name: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<SubscriptionHandle, HubError> {
        require_segment("publisherID", &self.device_id)?;
        ensure_segment("thingID", thing_id)?;
        ensure_segment("name", name)?;
        let pattern = thing_pattern(&self.device_id, thing_id, MessageType::Action, name);
        subscribe(
            &self.subscriptions,
            pattern,
            Arc::new(SkipProperties { inner: handler }),
        )
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.count()
    }

    /// 释放本能力持有的全部订阅。
    pub fn release(&self) {
        self.subscriptions.release_all();
    }
}

impl Drop for DevicePubSub {
    fn drop(&mut self) {
        self.subscriptions.release_all();
    }
}
