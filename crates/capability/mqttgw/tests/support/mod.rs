#![allow(dead_code)]

use domain::{ClientType, ThingAddr};
use hub_auth::{AuthService, Role};
use hub_bucketstore::MemBucketStore;
use hub_directory::{Directory, DirectoryService};
use hub_history::{Historian, HistorianConfig, HistoryService};
use hub_mqttgw::{ClientOptions, FrontendConfig, HubMqttClient, MqttGateway, MqttListener};
use hub_pubsub::{PubSubConfig, PubSubService};
use hub_resolver::Resolver;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const LAB_GROUP: &str = "lab";

pub struct TestHub {
    pub addr: SocketAddr,
    pub gateway: Arc<MqttGateway>,
    pub auth: Arc<AuthService>,
    pub pubsub: Arc<PubSubService>,
    pub directory: Arc<Directory>,
    pub historian: Arc<Historian>,
    cancel: CancellationToken,
    server: JoinHandle<()>,
}

impl TestHub {
    pub async fn start() -> Self {
        let auth = Arc::new(
            AuthService::open(Arc::new(MemBucketStore::new()))
                .await
                .expect("open auth"),
        );
        for (login, client_type) in [
            ("dev1", ClientType::Device),
            ("devA", ClientType::Device),
            ("alice", ClientType::User),
            ("watcher", ClientType::Service),
        ] {
            auth.add_client(login, login, client_type, &password_of(login))
                .await
                .expect("add client");
        }
        auth.add_thing(LAB_GROUP, &ThingAddr::new("dev1", "sensor1"))
            .await
            .expect("add thing");
        auth.set_role(LAB_GROUP, "alice", Role::Viewer)
            .await
            .expect("set role");

        let acl = auth.acl();
        let pubsub = Arc::new(PubSubService::new(PubSubConfig::default(), acl.clone()));
        let directory = Arc::new(Directory::new(Arc::new(MemBucketStore::new())));
        directory.start(&pubsub).expect("start directory");
        let historian = Arc::new(Historian::new(
            Arc::new(MemBucketStore::new()),
            HistorianConfig::default(),
        ));
        historian.start(&pubsub).expect("start historian");

        let resolver = Arc::new(Resolver::new());
        resolver.register_local(hub_pubsub::CAPABILITY_NAME, pubsub.clone());
        resolver.register_local::<dyn DirectoryService>(
            hub_directory::CAPABILITY_NAME,
            directory.clone(),
        );
        resolver.register_local::<dyn HistoryService>(
            hub_history::CAPABILITY_NAME,
            historian.clone(),
        );
        let gateway = Arc::new(MqttGateway::new(resolver, auth.clone(), acl));

        let listener = MqttListener::bind("127.0.0.1:0", FrontendConfig::default())
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let cancel = CancellationToken::new();
        let server = tokio::spawn(listener.serve(gateway.clone(), cancel.clone()));

        Self {
            addr,
            gateway,
            auth,
            pubsub,
            directory,
            historian,
            cancel,
            server,
        }
    }

    pub async fn client(&self, login: &str) -> HubMqttClient {
        HubMqttClient::connect(self.options(login))
            .await
            .expect("connect client")
    }

    pub fn options(&self, login: &str) -> ClientOptions {
        ClientOptions::new("127.0.0.1", self.addr.port(), login, &password_of(login))
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.server.await.expect("server task");
        self.historian.stop().await;
        self.directory.stop();
        self.pubsub.stop();
    }
}

pub fn password_of(login: &str) -> String {
    format!("{login}-pw")
}

/// 轮询直到返回 Some，超时则失败。
pub async fn eventually<T, F, Fut>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if let Some(value) = probe().await {
            return value;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached before deadline"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
