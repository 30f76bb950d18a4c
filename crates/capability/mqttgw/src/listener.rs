//! MQTT 3.1.1 TCP 前端。
//!
//! 每个连接一个读循环 + 一个写任务；下行报文经有界通道交给写任务，
//! 订阅投递与服务应答都只写回本连接。

use crate::codec::{self, CodecError, Connect, Packet, Publish, SUBACK_FAILURE, connack};
use crate::gateway::{MqttGateway, SessionWriter};
use crate::session::MqttSession;
use async_trait::async_trait;
use bytes::BytesMut;
use domain::HubError;
use hub_auth::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 前端连接参数。
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    pub max_packet_bytes: usize,
    /// CONNECT 中 keep-alive 为 0 时不做空闲超时；此值用于等待 CONNECT。
    pub connect_timeout: Duration,
    pub outbound_capacity: usize,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            max_packet_bytes: 1024 * 1024,
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 256,
        }
    }
}

/// 经通道写回连接的会话下行实现。
struct ChannelWriter {
    outbound: mpsc::Sender<Packet>,
}

#[async_trait]
impl SessionWriter for ChannelWriter {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), HubError> {
        self.outbound
            .send(Packet::Publish(Publish::at_most_once(topic, payload)))
            .await
            .map_err(|_| HubError::Transport("session closed".to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("connection closed")]
    Closed,
    #[error("keep-alive expired")]
    Idle,
}

pub struct MqttListener {
    listener: TcpListener,
    config: FrontendConfig,
}

impl MqttListener {
    pub async fn bind(addr: &str, config: FrontendConfig) -> Result<Self, HubError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| HubError::Transport(format!("bind {addr}: {err}")))?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HubError> {
        self.listener
            .local_addr()
            .map_err(|err| HubError::Transport(err.to_string()))
    }

    /// 接受连接直到取消；返回前等待所有连接结束。
    pub async fn serve(self, gateway: Arc<MqttGateway>, cancel: CancellationToken) {
        let tracker = TaskTracker::new();
        if let Ok(addr) = self.listener.local_addr() {
            info!(target: "hub.mqttgw", addr = %addr, "mqtt_listening");
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracker.spawn(handle_connection(
                            stream,
                            peer,
                            gateway.clone(),
                            self.config.clone(),
                            cancel.child_token(),
                        ));
                    }
                    Err(err) => {
                        warn!(target: "hub.mqttgw", error = %err, "mqtt_accept_failed");
                    }
                },
            }
        }
        tracker.close();
        tracker.wait().await;
        info!(target: "hub.mqttgw", "mqtt_listener_stopped");
    }
}

struct PacketReader {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_packet_bytes: usize,
}

impl PacketReader {
    async fn read_packet(&mut self) -> Result<Packet, ConnectionError> {
        loop {
            if let Some(packet) = codec::decode(&mut self.buffer, self.max_packet_bytes)? {
                return Ok(packet);
            }
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return Err(ConnectionError::Closed);
            }
        }
    }

    async fn read_with_timeout(&mut self, timeout: Option<Duration>) -> Result<Packet, ConnectionError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_packet())
                .await
                .map_err(|_| ConnectionError::Idle)?,
            None => self.read_packet().await,
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Packet>,
    cancel: CancellationToken,
) {
    let mut buffer = BytesMut::new();
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => break,
            packet = outbound.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };
        buffer.clear();
        if let Err(err) = codec::encode(&packet, &mut buffer) {
            warn!(target: "hub.mqttgw", packet = packet.name(), error = %err, "mqtt_encode_failed");
            continue;
        }
        if let Err(err) = writer.write_all(&buffer).await {
            debug!(target: "hub.mqttgw", error = %err, "mqtt_write_failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

fn credentials(connect: &Connect) -> Option<Credentials> {
    let login_id = connect
        .username
        .clone()
        .filter(|name| !name.is_empty())?;
    let password = String::from_utf8(connect.password.clone()?).ok()?;
    Some(Credentials::Password { login_id, password })
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    gateway: Arc<MqttGateway>,
    config: FrontendConfig,
    cancel: CancellationToken,
) {
    let (reader, writer) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, cancel.clone()));
    let mut reader = PacketReader {
        reader,
        buffer: BytesMut::with_capacity(4096),
        max_packet_bytes: config.max_packet_bytes,
    };

    let connect = match reader.read_with_timeout(Some(config.connect_timeout)).await {
        Ok(Packet::Connect(connect)) => connect,
        Ok(other) => {
            warn!(target: "hub.mqttgw", peer = %peer, packet = other.name(), "mqtt_expected_connect");
            cancel.cancel();
            return;
        }
        Err(ConnectionError::Codec(CodecError::UnsupportedProtocol(name, level))) => {
            warn!(target: "hub.mqttgw", peer = %peer, protocol = %name, level, "mqtt_unsupported_protocol");
            let _ = outbound
                .send(Packet::ConnAck {
                    session_present: false,
                    code: connack::UNACCEPTABLE_PROTOCOL,
                })
                .await;
            drop(outbound);
            let _ = writer_task.await;
            return;
        }
        Err(err) => {
            debug!(target: "hub.mqttgw", peer = %peer, error = %err, "mqtt_connect_failed");
            cancel.cancel();
            return;
        }
    };

    let session = match credentials(&connect) {
        Some(credentials) => {
            let channel: Arc<dyn SessionWriter> = Arc::new(ChannelWriter {
                outbound: outbound.clone(),
            });
            gateway.on_connect(&credentials, channel).await.ok()
        }
        None => None,
    };
    let Some(session) = session else {
        let code = if connect.username.is_none() {
            connack::NOT_AUTHORIZED
        } else {
            connack::BAD_CREDENTIALS
        };
        let _ = outbound
            .send(Packet::ConnAck {
                session_present: false,
                code,
            })
            .await;
        drop(outbound);
        let _ = writer_task.await;
        return;
    };
    if outbound
        .send(Packet::ConnAck {
            session_present: false,
            code: connack::ACCEPTED,
        })
        .await
        .is_err()
    {
        session.on_disconnect();
        return;
    }

    // keep-alive 的 1.5 倍内无报文视为断开
    let idle = (connect.keep_alive > 0)
        .then(|| Duration::from_millis(u64::from(connect.keep_alive) * 1500));
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = session_loop(&session, &mut reader, &outbound, idle) => result,
    };
    if let Err(err) = result {
        debug!(
            target: "hub.mqttgw",
            session_id = %session.session_id(),
            peer = %peer,
            error = %err,
            "mqtt_connection_ended"
        );
    }
    session.on_disconnect();
    drop(session);
    drop(outbound);
    cancel.cancel();
    let _ = writer_task.await;
}

async fn session_loop(
    session: &MqttSession,
    reader: &mut PacketReader,
    outbound: &mpsc::Sender<Packet>,
    idle: Option<Duration>,
) -> Result<(), ConnectionError> {
    loop {
        let reply = match reader.read_with_timeout(idle).await? {
            Packet::Publish(publish) => {
                // 被拒绝的发布只记录日志，会话保持打开
                if let Err(err) = session.on_publish(&publish.topic, &publish.payload).await {
                    debug!(
                        target: "hub.mqttgw",
                        session_id = %session.session_id(),
                        topic = %publish.topic,
                        error = %err,
                        "mqtt_publish_failed"
                    );
                }
                publish
                    .packet_id
                    .map(|packet_id| Packet::PubAck { packet_id })
            }
            Packet::Subscribe { packet_id, filters } => {
                let mut codes = Vec::with_capacity(filters.len());
                for (filter, _qos) in &filters {
                    let code = match session.on_subscribe(filter).await {
                        Ok(()) => 0,
                        Err(err) => {
                            warn!(
                                target: "hub.mqttgw",
                                session_id = %session.session_id(),
                                filter = %filter,
                                error = %err,
                                "mqtt_subscribe_rejected"
                            );
                            SUBACK_FAILURE
                        }
                    };
                    codes.push(code);
                }
                Some(Packet::SubAck { packet_id, codes })
            }
            Packet::Unsubscribe { packet_id, filters } => {
                for filter in &filters {
                    session.on_unsubscribe(filter);
                }
                Some(Packet::UnsubAck { packet_id })
            }
            Packet::PingReq => Some(Packet::PingResp),
            Packet::Disconnect => return Ok(()),
            Packet::Connect(_) => {
                return Err(CodecError::Malformed("second CONNECT".to_string()).into());
            }
            other => {
                debug!(target: "hub.mqttgw", packet = other.name(), "mqtt_packet_ignored");
                None
            }
        };
        if let Some(reply) = reply {
            outbound
                .send(reply)
                .await
                .map_err(|_| ConnectionError::Closed)?;
        }
    }
}
