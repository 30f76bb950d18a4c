//! 用户能力：向可操作的 Thing 发送动作，订阅可查看 Thing 的事件与 TD。

use crate::capability::{AclFilter, publish_value, reject, subscribe};
use crate::bus::PubSubCore;
use crate::handler::ValueHandler;
use crate::subscription::{SubscriptionHandle, SubscriptionSet};
use domain::topic::ensure_segment;
use domain::{HubError, MessageType, ThingAddr, ThingValue, thing_pattern, thing_topic};
use hub_auth::ThingAuthorizer;
use std::sync::Arc;

pub struct UserPubSub {
    user_id: String,
    authorizer: Arc<dyn ThingAuthorizer>,
    subscriptions: SubscriptionSet,
}

impl UserPubSub {
    pub(crate) fn new(
        user_id: String,
        authorizer: Arc<dyn ThingAuthorizer>,
        core: Arc<PubSubCore>,
    ) -> Self {
        Self {
            user_id,
            authorizer,
            subscriptions: SubscriptionSet::new(core),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// 向 Thing 发送动作，需要 operator 及以上角色。
    pub async fn pub_action(
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
        .await
    }

    /// 发布已构造的值；用户只能发布动作。
    pub async fn publish(
        &self,
        msg_type: MessageType,
        topic_name: &str,
        value: ThingValue,
    ) -> Result<(), HubError> {
        let topic = thing_topic(&value.publisher_id, &value.thing_id, msg_type, topic_name);
        if msg_type != MessageType::Action {
            return Err(reject(&self.user_id, &topic, "users may only publish actions"));
        }
        if !self
            .authorizer
            .can_operate(&self.user_id, &value.address())
            .await
        {
            return Err(reject(&self.user_id, &topic, "not an operator of this thing"));
        }
        publish_value(self.subscriptions.core(), msg_type, topic_name, &value)?;
        Ok(())
    }

    /// 订阅事件；空参数为通配，但 thingID 与 name 不能同时为空。
    pub async fn sub_event(
        &self,
        publisher_id: &str,
        thing_id: &str,
        name: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<SubscriptionHandle, HubError> {
        if thing_id.is_empty() && name.is_empty() {
            return Err(HubError::invalid("thingID or name is required"));
        }
        self.subscribe_filtered(MessageType::Event, publisher_id, thing_id, name, handler)
            .await
    }

    /// 订阅 TD；空参数为通配。
    pub async fn sub_tds(
        &self,
        publisher_id: &str,
        thing_id: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<SubscriptionHandle, HubError> {
        self.subscribe_filtered(MessageType::Td, publisher_id, thing_id, "", handler)
            .await
    }

    async fn subscribe_filtered(
        &self,
        msg_type: MessageType,
        publisher_id: &str,
        thing_id: &str,
        name: &str,
        handler: Arc<dyn ValueHandler>,
    ) -> Result<SubscriptionHandle, HubError> {
        ensure_segment("publisherID", publisher_id)?;
        ensure_segment("thingID", thing_id)?;
        ensure_segment("name", name)?;
        let pattern = thing_pattern(publisher_id, thing_id, msg_type, name);
        if !publisher_id.is_empty() && !thing_id.is_empty() {
            let addr = ThingAddr::new(publisher_id, thing_id);
            if !self.authorizer.can_view(&self.user_id, &addr).await {
                return Err(reject(&self.user_id, &pattern, "not a viewer of this thing"));
            }
        }
        let filtered = Arc::new(AclFilter {
            client_id: self.user_id.clone(),
            authorizer: self.authorizer.clone(),
            inner: handler,
        });
        subscribe(&self.subscriptions, pattern, filtered)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.count()
    }

    pub fn release(&self) {
        self.subscriptions.release_all();
    }
}

impl Drop for UserPubSub {
    fn drop(&mut self) {
        self.subscriptions.release_all();
    }
}
