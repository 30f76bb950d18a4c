//! 已认证客户端身份。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 客户端类型，决定发布/订阅能力的形态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Device,
    User,
    Service,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Device => "device",
            ClientType::User => "user",
            ClientType::Service => "service",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "device" => Some(ClientType::Device),
            "user" => Some(ClientType::User),
            "service" => Some(ClientType::Service),
            _ => None,
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 认证通过的客户端。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_type: ClientType,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>, client_type: ClientType) -> Self {
        Self {
            client_id: client_id.into(),
            client_type,
        }
    }
}
