//! 单个 MQTT 会话：Thing 主题发布/订阅映射与服务请求分发。

use crate::gateway::SessionWriter;
use crate::requests;
use async_trait::async_trait;
use domain::time::now_iso;
use domain::topic::WILDCARD;
use domain::{ClientIdentity, HubError, MessageType, ThingTopic, ThingValue, thing_topic};
use hub_auth::ThingAuthorizer;
use hub_pubsub::{DevicePubSub, ServicePubSub, SubscriptionHandle, UserPubSub, ValueHandler};
use hub_resolver::Resolver;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{Instrument, debug, info, info_span, warn};

/// 按客户端类型区分的发布/订阅能力。
pub enum ClientPubSub {
    Device(DevicePubSub),
    User(UserPubSub),
    Service(ServicePubSub),
}

impl ClientPubSub {
    fn release(&self) {
        match self {
            ClientPubSub::Device(cap) => cap.release(),
            ClientPubSub::User(cap) => cap.release(),
            ClientPubSub::Service(cap) => cap.release(),
        }
    }
}

/// 把订阅到的值以 JSON 信封回写到会话。
struct Republish {
    msg_type: MessageType,
    writer: Arc<dyn SessionWriter>,
}

#[async_trait]
impl ValueHandler for Republish {
    async fn handle(&self, value: ThingValue) {
        let topic = thing_topic(&value.publisher_id, &value.thing_id, self.msg_type, &value.name);
        let payload = match value.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "hub.mqttgw", topic = %topic, error = %err, "republish_encode_failed");
                return;
            }
        };
        if let Err(err) = self.writer.send(&topic, payload).await {
            debug!(target: "hub.mqttgw", topic = %topic, error = %err, "republish_failed");
        }
    }
}

pub struct MqttSession {
    session_id: String,
    identity: ClientIdentity,
    pubsub: ClientPubSub,
    writer: Arc<dyn SessionWriter>,
    resolver: Arc<Resolver>,
    authorizer: Arc<dyn ThingAuthorizer>,
    subscriptions: Mutex<HashMap<String, Vec<SubscriptionHandle>>>,
    closed: AtomicBool,
}

impl MqttSession {
    pub(crate) fn new(
        identity: ClientIdentity,
        pubsub: ClientPubSub,
        writer: Arc<dyn SessionWriter>,
        resolver: Arc<Resolver>,
        authorizer: Arc<dyn ThingAuthorizer>,
    ) -> Self {
        Self {
            session_id: hub_telemetry::new_request_ids().request_id,
            identity,
            pubsub,
            writer,
            resolver,
            authorizer,
            subscriptions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// 处理客户端 PUBLISH。
    ///
    /// 服务请求主题的失败以错误应答回写，不作为返回值；Thing 主题被拒绝时返回
    /// `NotPermitted`，会话保持打开。
    pub async fn on_publish(&self, topic: &str, payload: &[u8]) -> Result<(), HubError> {
        if let Some(reply_topic) = api_contract::reply_topic(topic) {
            return self.serve_request(topic, reply_topic, payload).await;
        }
        let parsed = ThingTopic::parse(topic)
            .ok_or_else(|| HubError::invalid(format!("unsupported topic: {topic}")))?;
        if parsed.has_wildcard() {
            return Err(HubError::invalid(format!("wildcard in publish topic: {topic}")));
        }
        let value = value_from_payload(&parsed, payload);
        let result = match &self.pubsub {
            ClientPubSub::Device(cap) => cap.publish(parsed.msg_type, &parsed.name, value),
            ClientPubSub::User(cap) => cap.publish(parsed.msg_type, &parsed.name, value).await,
            ClientPubSub::Service(cap) => cap.publish(parsed.msg_type, &parsed.name, value),
        };
        if let Err(err) = &result {
            warn!(
                target: "hub.mqttgw",
                session_id = %self.session_id,
                client_id = %self.identity.client_id,
                topic,
                error = %err,
                "mqtt_publish_rejected"
            );
        }
        result
    }

    /// 处理 SUBSCRIBE 中的单个过滤器。服务应答主题无需订阅，直接接受。
    pub async fn on_subscribe(&self, filter: &str) -> Result<(), HubError> {
        if api_contract::is_reply_topic(filter) {
            return Ok(());
        }
        let parsed = ThingTopic::parse(filter)
            .ok_or_else(|| HubError::invalid(format!("unsupported topic filter: {filter}")))?;
        let publisher_id = segment(&parsed.publisher_id);
        let thing_id = segment(&parsed.thing_id);
        let name = segment(&parsed.name);
        let handler: Arc<dyn ValueHandler> = Arc::new(Republish {
            msg_type: parsed.msg_type,
            writer: self.writer.clone(),
        });
        let handle = match (&self.pubsub, parsed.msg_type) {
            (ClientPubSub::Device(cap), MessageType::Action) => {
                if !publisher_id.is_empty() && publisher_id != cap.device_id() {
                    return Err(HubError::not_permitted(format!(
                        "device {} may only subscribe to its own actions",
                        cap.device_id()
                    )));
                }
                cap.sub_action(thing_id, name, handler)?
            }
            (ClientPubSub::User(cap), MessageType::Event) => {
                cap.sub_event(publisher_id, thing_id, name, handler).await?
            }
            (ClientPubSub::User(cap), MessageType::Td) => {
                cap.sub_tds(publisher_id, thing_id, handler).await?
            }
            (ClientPubSub::Service(cap), MessageType::Event) => {
                cap.sub_event(publisher_id, thing_id, name, handler)?
            }
            (ClientPubSub::Service(cap), MessageType::Action) => {
                cap.sub_actions(publisher_id, thing_id, name, handler)?
            }
            (ClientPubSub::Service(cap), MessageType::Td) => {
                cap.sub_tds(publisher_id, thing_id, handler)?
            }
            (_, msg_type) => {
                return Err(HubError::not_permitted(format!(
                    "{} clients may not subscribe to {msg_type} topics",
                    self.identity.client_type.as_str()
                )));
            }
        };
        debug!(
            target: "hub.mqttgw",
            session_id = %self.session_id,
            filter,
            subscription_id = handle.id(),
            "mqtt_subscribed"
        );
        self.lock_subscriptions()
            .entry(filter.to_string())
            .or_default()
            .push(handle);
        Ok(())
    }

    /// 取消过滤器对应的订阅；返回是否存在。
    pub fn on_unsubscribe(&self, filter: &str) -> bool {
        let handles = self.lock_subscriptions().remove(filter);
        match handles {
            Some(handles) => {
                handles.iter().for_each(SubscriptionHandle::release);
                true
            }
            None => false,
        }
    }

    /// 释放会话持有的全部订阅与能力（幂等）。
    pub fn on_disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<SubscriptionHandle> = self
            .lock_subscriptions()
            .drain()
            .flat_map(|(_, handles)| handles)
            .collect();
        handles.iter().for_each(SubscriptionHandle::release);
        self.pubsub.release();
        info!(
            target: "hub.mqttgw",
            session_id = %self.session_id,
            client_id = %self.identity.client_id,
            "mqtt_session_closed"
        );
        hub_telemetry::record_mqtt_session_closed();
    }

    async fn serve_request(
        &self,
        topic: &str,
        reply_topic: &str,
        payload: &[u8],
    ) -> Result<(), HubError> {
        let ids = hub_telemetry::new_request_ids();
        let span = info_span!(
            target: "hub.mqttgw",
            "mqtt_request",
            request_id = %ids.request_id,
            client_id = %self.identity.client_id,
            topic
        );
        async {
            hub_telemetry::record_mqtt_request();
            let context = requests::RequestContext {
                identity: &self.identity,
                resolver: &self.resolver,
                authorizer: self.authorizer.as_ref(),
            };
            let reply = match requests::dispatch(&context, topic, payload).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(target: "hub.mqttgw", error = %err, "mqtt_request_failed");
                    requests::error_reply(&err)
                }
            };
            self.writer.send(reply_topic, reply).await
        }
        .instrument(span)
        .await
    }

    fn lock_subscriptions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Vec<SubscriptionHandle>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.on_disconnect();
    }
}

fn segment(value: &str) -> &str {
    if value == WILDCARD { "" } else { value }
}

/// 信封允许出现的字段。
const ENVELOPE_KEYS: [&str; 6] = ["publisherID", "thingID", "name", "data", "encoding", "created"];

/// 至少带一个这些字段才视为信封，避免误读恰好含 `data` 的原始负载。
const ENVELOPE_MARKERS: [&str; 3] = ["publisherID", "thingID", "created"];

fn looks_like_envelope(body: &serde_json::Value) -> bool {
    let Some(object) = body.as_object() else {
        return false;
    };
    object.get("data").is_some_and(serde_json::Value::is_string)
        && object.keys().all(|key| ENVELOPE_KEYS.contains(&key.as_str()))
        && ENVELOPE_MARKERS.iter().any(|key| object.contains_key(*key))
}

/// 负载为信封形状时按信封解析，否则整体作为 `data`。主题字段总是覆盖信封字段。
pub fn value_from_payload(topic: &ThingTopic, payload: &[u8]) -> ThingValue {
    let envelope = serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .filter(looks_like_envelope)
        .and_then(|_| ThingValue::decode(payload).ok());
    let mut value = envelope.unwrap_or_else(|| ThingValue::new("", "", "", payload.to_vec()));
    value.publisher_id = topic.publisher_id.clone();
    value.thing_id = topic.thing_id.clone();
    value.name = topic.name.clone();
    if value.created.is_empty() {
        value.created = now_iso();
    }
    value
}
