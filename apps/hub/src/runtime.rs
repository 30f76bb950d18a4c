//! 运行时装配
//!
//! 按服务打开各自的存储（`{data_dir}/{directory,history,auth}`），启动发布/订阅核心、
//! 目录与历史服务，并把它们登记到能力解析器，MQTT 网关只经解析器取用这些能力。
//! 停止时按启动的逆序进行，最后关闭存储；关闭失败只记录日志。

use domain::HubError;
use hub_auth::AuthService;
use hub_bucketstore::{BucketStore, open_store};
use hub_config::{ENGINE_SQLITE, HubConfig};
use hub_directory::{Directory, DirectoryService};
use hub_history::{Historian, HistorianConfig, HistoryService, RetentionPolicy};
use hub_mqttgw::{FrontendConfig, MqttGateway, MqttListener};
use hub_pubsub::{PubSubConfig, PubSubService};
use hub_resolver::{Resolver, default_resolver};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DIRECTORY_DIR: &str = "directory";
pub const HISTORY_DIR: &str = "history";
pub const AUTH_DIR: &str = "auth";

pub struct Hub {
    pub resolver: Arc<Resolver>,
    pub auth: Arc<AuthService>,
    pub pubsub: Arc<PubSubService>,
    pub directory: Arc<Directory>,
    pub historian: Arc<Historian>,
    stores: Vec<(&'static str, Arc<dyn BucketStore>)>,
}

/// 正在运行的 MQTT 前端。
pub struct Serving {
    pub local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Serving {
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(target: "hub", error = %err, "mqtt_listener_join_failed");
        }
    }
}

fn store_path(config: &HubConfig, service: &str) -> PathBuf {
    let file = if config.store_engine == ENGINE_SQLITE {
        format!("{service}.db")
    } else {
        format!("{service}.json")
    };
    config.service_dir(service).join(file)
}

async fn open_service_store(
    config: &HubConfig,
    service: &str,
) -> Result<Arc<dyn BucketStore>, HubError> {
    let dir = config.service_dir(service);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|err| HubError::StoreIo(format!("create {}: {err}", dir.display())))?;
    let store = open_store(&config.store_engine, store_path(config, service)).await?;
    Ok(store)
}

async fn historian_config(config: &HubConfig) -> Result<HistorianConfig, HubError> {
    let retention = match &config.retention_file {
        Some(path) => RetentionPolicy::load(path).await?,
        None => RetentionPolicy::default(),
    };
    Ok(HistorianConfig {
        retention,
        sweep_interval: Duration::from_secs(config.retention_sweep_seconds.max(1)),
        retention_batch: config.retention_batch,
        latest_flush_interval: Duration::from_secs(config.latest_flush_seconds.max(1)),
        ingest: config.history_ingest,
    })
}

impl Hub {
    pub async fn start(config: &HubConfig) -> Result<Self, HubError> {
        let auth_store = open_service_store(config, AUTH_DIR).await?;
        let directory_store = open_service_store(config, DIRECTORY_DIR).await?;
        let history_store = open_service_store(config, HISTORY_DIR).await?;

        let auth = Arc::new(AuthService::open(auth_store.clone()).await?);
        if let Some(password) = &config.password_admin {
            auth.bootstrap_admin(password).await?;
        }

        let pubsub = Arc::new(PubSubService::new(
            PubSubConfig {
                queue_capacity: config.subscriber_queue,
            },
            auth.acl(),
        ));
        let directory = Arc::new(Directory::new(directory_store.clone()));
        directory.start(&pubsub)?;
        let historian = Arc::new(Historian::new(
            history_store.clone(),
            historian_config(config).await?,
        ));
        historian.start(&pubsub)?;

        let resolver = default_resolver();
        resolver.register_local(hub_pubsub::CAPABILITY_NAME, pubsub.clone());
        resolver.register_local::<dyn DirectoryService>(
            hub_directory::CAPABILITY_NAME,
            directory.clone(),
        );
        resolver.register_local::<dyn HistoryService>(
            hub_history::CAPABILITY_NAME,
            historian.clone(),
        );
        info!(
            target: "hub",
            data_dir = %config.data_dir.display(),
            engine = %config.store_engine,
            "services_started"
        );

        Ok(Self {
            resolver,
            auth,
            pubsub,
            directory,
            historian,
            stores: vec![
                (HISTORY_DIR, history_store),
                (DIRECTORY_DIR, directory_store),
                (AUTH_DIR, auth_store),
            ],
        })
    }

    /// 绑定 MQTT 前端并在后台接受连接。
    pub async fn serve_mqtt(&self, config: &HubConfig) -> Result<Serving, HubError> {
        let gateway = Arc::new(MqttGateway::new(
            self.resolver.clone(),
            self.auth.clone(),
            self.auth.acl(),
        ));
        let listener = MqttListener::bind(
            &config.mqtt_addr,
            FrontendConfig {
                max_packet_bytes: config.mqtt_max_packet_bytes,
                ..FrontendConfig::default()
            },
        )
        .await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.serve(gateway, cancel.clone()));
        Ok(Serving {
            local_addr,
            cancel,
            task,
        })
    }

    /// 逆序停止服务并关闭存储。
    pub async fn stop(self) {
        for name in [
            hub_history::CAPABILITY_NAME,
            hub_directory::CAPABILITY_NAME,
            hub_pubsub::CAPABILITY_NAME,
        ] {
            self.resolver.unregister(name);
        }
        self.historian.stop().await;
        self.directory.stop();
        self.pubsub.stop();
        let Self { stores, .. } = self;
        for (name, store) in stores {
            match store.close().await {
                Ok(()) => info!(target: "hub", store = name, "store_closed"),
                Err(err) => warn!(target: "hub", store = name, error = %err, "store_close_failed"),
            }
        }
        info!(target: "hub", "hub_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_for(dir: &std::path::Path, engine: &str) -> HubConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("HUB_DATA_DIR", dir.display().to_string()),
            ("HUB_STORE_ENGINE", engine.to_string()),
            ("HUB_MQTT_ADDR", "127.0.0.1:0".to_string()),
            ("HUB_PASSWORD_ADMIN", "admin-pw".to_string()),
        ]);
        HubConfig::from_lookup(|key| vars.get(key).cloned()).expect("config")
    }

    #[tokio::test]
    async fn hub_starts_serves_and_persists_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_for(dir.path(), "sqlite");

        let hub = Hub::start(&config).await.expect("start");
        let serving = hub.serve_mqtt(&config).await.expect("serve");
        assert_ne!(serving.local_addr.port(), 0);
        hub.auth.login("admin", "admin-pw").await.expect("admin login");
        hub.pubsub
            .cap_device_pubsub("dev1")
            .pub_td("sensor1", r#"{"title":"sensor"}"#)
            .expect("publish td");
        serving.stop().await;
        hub.stop().await;

        for service in [DIRECTORY_DIR, HISTORY_DIR, AUTH_DIR] {
            assert!(store_path(&config, service).exists(), "{service} store file");
        }
    }
}
