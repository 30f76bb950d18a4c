//! MQTT 网关
//!
//! 把 Hub 暴露为标准 MQTT 接口：
//! - Thing 主题 `things/{publisherID}/{thingID}/{msgType}/{name}` 直接映射到发布/订阅能力
//! - 服务请求主题 `services/{directory,history}/action/*` 由网关代为查询目录与历史，
//!   应答只写回发起请求的会话
//!
//! `MqttGateway` 与 `MqttSession` 是与传输无关的会话钩子；`MqttListener` 是基于
//! tokio 的 MQTT 3.1.1 TCP 前端；`HubMqttClient` 是基于 rumqttc 的客户端。

pub mod client;
pub mod codec;
mod gateway;
mod listener;
mod requests;
mod session;

pub use client::{ClientOptions, HubMqttClient, IncomingMessage, error_from_reply};
pub use gateway::{MqttGateway, SessionWriter};
pub use listener::{FrontendConfig, MqttListener};
pub use session::{ClientPubSub, MqttSession, value_from_payload};
