//! MQTT 网关：CONNECT 认证并按客户端类型签发发布/订阅能力。

use crate::session::{ClientPubSub, MqttSession};
use async_trait::async_trait;
use domain::{ClientType, HubError};
use hub_auth::{Authenticator, Credentials, ThingAuthorizer};
use hub_pubsub::PubSubService;
use hub_resolver::Resolver;
use std::sync::Arc;
use tracing::{info, warn};

/// 会话下行通道：把消息写回发起会话的客户端。
#[async_trait]
pub trait SessionWriter: Send + Sync {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), HubError>;
}

/// MQTT 网关。依赖的发布/订阅、目录与历史能力均经解析器获取。
pub struct MqttGateway {
    resolver: Arc<Resolver>,
    authenticator: Arc<dyn Authenticator>,
    authorizer: Arc<dyn ThingAuthorizer>,
}

impl MqttGateway {
    pub fn new(
        resolver: Arc<Resolver>,
        authenticator: Arc<dyn Authenticator>,
        authorizer: Arc<dyn ThingAuthorizer>,
    ) -> Self {
        Self {
            resolver,
            authenticator,
            authorizer,
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// 认证客户端并建立会话。
    pub async fn on_connect(
        &self,
        credentials: &Credentials,
        writer: Arc<dyn SessionWriter>,
    ) -> Result<MqttSession, HubError> {
        let identity = match self.authenticator.authenticate(credentials).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(target: "hub.mqttgw", error = %err, "mqtt_connect_rejected");
                return Err(err.into());
            }
        };
        let pubsub = self
            .resolver
            .get::<PubSubService>(hub_pubsub::CAPABILITY_NAME)
            .await?;
        let capability = match identity.client_type {
            ClientType::Device => ClientPubSub::Device(pubsub.cap_device_pubsub(&identity.client_id)),
            ClientType::User => ClientPubSub::User(pubsub.cap_user_pubsub(&identity.client_id)),
            ClientType::Service => {
                ClientPubSub::Service(pubsub.cap_service_pubsub(&identity.client_id))
            }
        };
        let session = MqttSession::new(
            identity,
            capability,
            writer,
            self.resolver.clone(),
            self.authorizer.clone(),
        );
        info!(
            target: "hub.mqttgw",
            session_id = %session.session_id(),
            client_id = %session.identity().client_id,
            client_type = session.identity().client_type.as_str(),
            "mqtt_session_opened"
        );
        hub_telemetry::record_mqtt_session_opened();
        Ok(session)
    }
}
