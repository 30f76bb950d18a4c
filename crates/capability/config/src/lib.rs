//! Hub 运行配置加载（`HUB_*` 环境变量）。

use std::env;
use std::path::PathBuf;

pub const ENGINE_SQLITE: &str = "sqlite";
pub const ENGINE_MEMORY: &str = "memory";

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// Hub 运行配置。
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// 持久化根目录，每个服务一个子目录。
    pub data_dir: PathBuf,
    pub store_engine: String,
    pub mqtt_addr: String,
    pub mqtt_max_packet_bytes: usize,
    pub subscriber_queue: usize,
    pub retention_file: Option<PathBuf>,
    pub retention_sweep_seconds: u64,
    pub retention_batch: usize,
    pub latest_flush_seconds: u64,
    pub password_admin: Option<String>,
    pub history_ingest: bool,
}

impl HubConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };
        let store_engine = source
            .string("HUB_STORE_ENGINE")
            .unwrap_or_else(|| ENGINE_SQLITE.to_string());
        if store_engine != ENGINE_SQLITE && store_engine != ENGINE_MEMORY {
            return Err(ConfigError::Invalid(
                "HUB_STORE_ENGINE".to_string(),
                store_engine,
            ));
        }

        Ok(Self {
            data_dir: source
                .string("HUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            store_engine,
            mqtt_addr: source
                .string("HUB_MQTT_ADDR")
                .unwrap_or_else(|| "127.0.0.1:8883".to_string()),
            mqtt_max_packet_bytes: source
                .positive_with_default("HUB_MQTT_MAX_PACKET_BYTES", 1024 * 1024)?,
            subscriber_queue: source.positive_with_default("HUB_SUBSCRIBER_QUEUE", 1024)?,
            retention_file: source.string("HUB_RETENTION_FILE").map(PathBuf::from),
            retention_sweep_seconds: source
                .parse_with_default("HUB_RETENTION_SWEEP_SECONDS", 3600)?,
            retention_batch: source.positive_with_default("HUB_RETENTION_BATCH", 500)?,
            latest_flush_seconds: source.parse_with_default("HUB_LATEST_FLUSH_SECONDS", 60)?,
            password_admin: source.string("HUB_PASSWORD_ADMIN"),
            history_ingest: source.bool_with_default("HUB_HISTORY_INGEST", true)?,
        })
    }

    /// 某个服务的数据目录。
    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.data_dir.join(service)
    }
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// 空字符串视为未设置。
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse_with_default<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            Some(value) => value
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
            None => Ok(default),
        }
    }

    fn positive_with_default(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.parse_with_default(key, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid(key.to_string(), "0".to_string()));
        }
        Ok(value)
    }

    fn bool_with_default(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.string(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Ok(true),
            "0" | "false" | "off" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid(key.to_string(), value)),
        }
    }
}
