//! Hub MQTT 客户端：基于 rumqttc 发布服务请求并等待对应应答。

use api_contract::{
    ErrorReply, ReadDirectoryRequest, ReadDirectoryResponse, ReadHistoryRequest,
    ReadHistoryResponse, ReadLatestRequest, ReadLatestResponse, TOPIC_DIRECTORY_REPLY,
    TOPIC_DIRECTORY_REQUEST, TOPIC_HISTORY_REPLY, TOPIC_HISTORY_REQUEST, TOPIC_LATEST_REPLY,
    TOPIC_LATEST_REQUEST,
};
use bytes::Bytes;
use domain::HubError;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 客户端收到的消息。
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// 客户端连接参数。
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub login_id: String,
    pub password: String,
    pub keep_alive: Duration,
    pub request_timeout: Duration,
    pub max_packet_bytes: usize,
}

impl ClientOptions {
    pub fn new(host: &str, port: u16, login_id: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            client_id: login_id.to_string(),
            login_id: login_id.to_string(),
            password: password.to_string(),
            keep_alive: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            max_packet_bytes: 1024 * 1024,
        }
    }
}

pub struct HubMqttClient {
    client: AsyncClient,
    messages: broadcast::Sender<IncomingMessage>,
    request_lock: Mutex<()>,
    request_timeout: Duration,
    event_task: JoinHandle<()>,
}

impl HubMqttClient {
    /// 连接并等待 CONNACK；随后订阅全部服务应答主题。
    pub async fn connect(options: ClientOptions) -> Result<Self, HubError> {
        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_credentials(&options.login_id, &options.password);
        mqtt.set_max_packet_size(options.max_packet_bytes, options.max_packet_bytes);
        let (client, eventloop) = AsyncClient::new(mqtt, 64);
        let (messages, _) = broadcast::channel(256);
        let (connected_tx, connected_rx) = oneshot::channel();
        let event_task = tokio::spawn(poll_events(eventloop, messages.clone(), connected_tx));

        let connected = tokio::time::timeout(options.request_timeout, connected_rx)
            .await
            .map_err(|_| HubError::Transport("connect timed out".to_string()))?
            .map_err(|_| HubError::Transport("event loop stopped".to_string()))?;
        if let Err(err) = connected {
            event_task.abort();
            return Err(err);
        }

        let hub = Self {
            client,
            messages,
            request_lock: Mutex::new(()),
            request_timeout: options.request_timeout,
            event_task,
        };
        for topic in [TOPIC_DIRECTORY_REPLY, TOPIC_HISTORY_REPLY, TOPIC_LATEST_REPLY] {
            hub.subscribe(topic).await?;
        }
        Ok(hub)
    }

    /// 订阅主题过滤器（QoS 0）。
    pub async fn subscribe(&self, filter: &str) -> Result<(), HubError> {
        self.client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|err| HubError::Transport(err.to_string()))
    }

    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), HubError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.into())
            .await
            .map_err(|err| HubError::Transport(err.to_string()))
    }

    /// 接收后续到达的全部消息。
    pub fn messages(&self) -> broadcast::Receiver<IncomingMessage> {
        self.messages.subscribe()
    }

    pub async fn read_directory(
        &self,
        request: &ReadDirectoryRequest,
    ) -> Result<ReadDirectoryResponse, HubError> {
        self.request(TOPIC_DIRECTORY_REQUEST, TOPIC_DIRECTORY_REPLY, request)
            .await
    }

    pub async fn read_history(
        &self,
        request: &ReadHistoryRequest,
    ) -> Result<ReadHistoryResponse, HubError> {
        self.request(TOPIC_HISTORY_REQUEST, TOPIC_HISTORY_REPLY, request)
            .await
    }

    pub async fn read_latest(
        &self,
        request: &ReadLatestRequest,
    ) -> Result<ReadLatestResponse, HubError> {
        self.request(TOPIC_LATEST_REQUEST, TOPIC_LATEST_REPLY, request)
            .await
    }

    /// 发布请求并等待应答主题上的下一条消息；同一客户端的请求串行执行。
    pub async fn request<Req, Resp>(
        &self,
        request_topic: &str,
        reply_topic: &str,
        request: &Req,
    ) -> Result<Resp, HubError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let _guard = self.request_lock.lock().await;
        let body = serde_json::to_vec(request)
            .map_err(|err| HubError::invalid(format!("request body: {err}")))?;
        let mut replies = self.messages.subscribe();
        self.publish(request_topic, body).await?;

        let wait = async {
            loop {
                match replies.recv().await {
                    Ok(message) if message.topic == reply_topic => return Ok(message.payload),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "hub.mqttgw", skipped, "client_reply_lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(HubError::Transport("connection closed".to_string()));
                    }
                }
            }
        };
        let payload = tokio::time::timeout(self.request_timeout, wait)
            .await
            .map_err(|_| HubError::Transport(format!("no reply on {reply_topic}")))??;
        decode_reply(&payload)
    }

    pub async fn disconnect(self) -> Result<(), HubError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|err| HubError::Transport(err.to_string()));
        self.event_task.abort();
        result
    }
}

fn decode_reply<Resp: DeserializeOwned>(payload: &[u8]) -> Result<Resp, HubError> {
    if let Ok(reply) = serde_json::from_slice::<ErrorReply>(payload) {
        return Err(error_from_reply(reply));
    }
    serde_json::from_slice(payload).map_err(|err| HubError::Transport(format!("reply body: {err}")))
}

/// 错误应答还原为对应的错误种类。
pub fn error_from_reply(reply: ErrorReply) -> HubError {
    match reply.code.as_str() {
        "INVALID_VALUE" => HubError::InvalidValue(reply.message),
        "NOT_PERMITTED" => HubError::NotPermitted(reply.message),
        "NOT_FOUND" => HubError::NotFound(reply.message),
        "STORE_IO" => HubError::StoreIo(reply.message),
        "CANCELLED" => HubError::Cancelled,
        _ => HubError::Transport(format!("{}: {}", reply.code, reply.message)),
    }
}

async fn poll_events(
    mut eventloop: EventLoop,
    messages: broadcast::Sender<IncomingMessage>,
    connected: oneshot::Sender<Result<(), HubError>>,
) {
    let mut connected = Some(connected);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let result = match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(HubError::not_permitted(format!("connect refused: {code:?}"))),
                };
                let refused = result.is_err();
                if let Some(connected) = connected.take() {
                    let _ = connected.send(result);
                }
                if refused {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = messages.send(IncomingMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                });
            }
            Ok(_) => {}
            Err(err) => {
                debug!(target: "hub.mqttgw", error = %err, "client_event_loop_stopped");
                if let Some(connected) = connected.take() {
                    let _ = connected.send(Err(HubError::Transport(err.to_string())));
                }
                break;
            }
        }
    }
}
