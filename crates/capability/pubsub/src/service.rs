//! 服务能力：设备能力与用户能力的并集，额外可订阅任意发布者的事件、动作与 TD。
//! 供历史记录、目录等内部服务使用，不经过 ACL。

use crate::capability::{SkipProperties, publish_value, reject, subscribe};
use crate::bus::PubSubCore;
use crate::handler::ValueHandler;
use crate::subscription::{SubscriptionHandle, SubscriptionSet};
use domain::topic::{TD_NAME, ensure_segment};
use domain::{HubError, MessageType, ThingValue, thing_pattern, thing_topic};
use std::sync::Arc;

pub struct ServicePubSub {
    service_id: String,
    subscriptions: SubscriptionSet,
}

impl ServicePubSub {
    pub(crate) fn new(service_id: String, core: Arc<PubSubCore>) -> Self {
        Self {
            service_id,
            subscriptions: SubscriptionSet::new(core),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// 以服务自身 ID 发布事件。
    pub fn pub_event(
        &self,
        thing_id: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), HubError> {
        self.publish(
            MessageType::Event,
            name,
            ThingValue::new(&self.service_id, thing_id, name, data),
        )
    }

    /// 以服务自身 ID 发布 TD。
    pub fn pub_td(&self, thing_id: &str, td: impl Into<Vec<u8>>) -> Result<(), HubError> {
        self.publish(
            MessageType::Td,
            "",
            ThingValue::new(&self.service_id, thing_id, TD_NAME, td),
        )
    }

    /// 向任意 Thing 发送动作。
    pub fn pub_action(
        &self,
        publisher_id: &str,
        thing_id: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), HubError> {
        self.publish(
            MessageType::Action,
            name,
            ThingValue::new(publisher_id, thing_id, name, data),
        )
    }

    /// 发布已构造的值。事件与 TD 的发布者必须是服务自身。
    pub fn publish(
        &self,
        msg_type: MessageType,
        topic_name: &str,
        mut value: ThingValue,
    ) -> Result<(), HubError> {
        if msg_type != MessageType::Action && value.publisher_id != self.service_id {
            let topic = thing_topic(&value.publisher_id, &value.thing_id, msg_type, topic_name);
            return Err(reject(&self.service_id, &topic, "publisher differs from service"));
        }
        if msg_type == MessageType::Td {
            value.name = TD_NAME.to_string();
        }
        publish_value(self.subscriptions.core(), msg_type, topic_name, &value)?;
        Ok(())
    }

    /// 订阅发给服务自身 Thing 的动作。
    pub fn sub_action(
        &self,
        thing_id: &str,
        name: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<SubscriptionHandle, HubError> {
        let pattern = self.pattern(MessageType::Action, &self.service_id, thing_id, name)?;
        subscribe(
            &self.subscriptions,
            pattern,
            Arc::new(SkipProperties { inner: handler }),
        )
    }

    /// 订阅任意发布者的动作；空参数为通配。
    pub fn sub_actions(
        &self,
        publisher_id: &str,
        thing_id: &str,
        name: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<SubscriptionHandle, HubError> {
        let pattern = self.pattern(MessageType::Action, publisher_id, thing_id, name)?;
        subscribe(&self.subscriptions, pattern, handler)
    }

    /// 订阅任意发布者的事件；空参数为通配。
    pub fn sub_event(
        &self,
        publisher_id: &str,
        thing_id: &str,
        name: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<SubscriptionHandle, HubError> {
        let pattern = self.pattern(MessageType::Event, publisher_id, thing_id, name)?;
        subscribe(&self.subscriptions, pattern, handler)
    }

    /// 订阅所有事件。
    pub fn sub_events(&self, handler: Arc<dyn ValueHandler>) -> Result<SubscriptionHandle, HubError> {
        self.sub_event("", "", "", handler)
    }

    /// 订阅 TD；空参数为通配。
    pub fn sub_tds(
        &self,
        publisher_id: &str,
        thing_id: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<SubscriptionHandle, HubError> {
        let pattern = self.pattern(MessageType::Td, publisher_id, thing_id, "")?;
        subscribe(&self.subscriptions, pattern, handler)
    }

    fn pattern(
        &self,
        msg_type: MessageType,
        publisher_id: &str,
        thing_id: &str,
        name: &str,
    ) -> Result<String, HubError> {
        ensure_segment("publisherID", publisher_id)?;
        ensure_segment("thingID", thing_id)?;
        ensure_segment("name", name)?;
        Ok(thing_pattern(publisher_id, thing_id, msg_type, name))
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.count()
    }

    pub fn release(&self) {
        self.subscriptions.release_all();
    }
}

impl Drop for ServicePubSub {
    fn drop(&mut self) {
        self.subscriptions.release_all();
    }
}
