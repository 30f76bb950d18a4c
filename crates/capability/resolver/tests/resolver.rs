use async_trait::async_trait;
use domain::HubError;
use hub_resolver::{Dialer, Resolver, RpcConnection, default_resolver};
use std::sync::Arc;

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

struct LocalGreeter;

impl Greeter for LocalGreeter {
    fn greet(&self) -> String {
        "local".to_string()
    }
}

struct RemoteGreeter {
    connection: Arc<dyn RpcConnection>,
}

impl Greeter for RemoteGreeter {
    fn greet(&self) -> String {
        format!("remote via {}", self.connection.url())
    }
}

struct FakeConnection {
    url: String,
}

#[async_trait]
impl RpcConnection for FakeConnection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, _capability: &str, _method: &str, payload: Vec<u8>) -> Result<Vec<u8>, HubError> {
        Ok(payload)
    }
}

struct FakeDialer {
    reachable: bool,
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, url: &str) -> Result<Arc<dyn RpcConnection>, HubError> {
        if !self.reachable {
            return Err(HubError::Transport("connection refused".to_string()));
        }
        Ok(Arc::new(FakeConnection {
            url: url.to_string(),
        }))
    }
}

fn remote_greeter(connection: Arc<dyn RpcConnection>) -> Arc<dyn Greeter> {
    Arc::new(RemoteGreeter { connection })
}

#[tokio::test]
async fn local_registration_wins() {
    let resolver = Resolver::new();
    let local: Arc<dyn Greeter> = Arc::new(LocalGreeter);
    resolver.register_local::<dyn Greeter>("greeter", local);
    resolver.register_remote::<dyn Greeter, _>("greeter", "tcp://far:1", remote_greeter);
    let greeter = resolver.get::<dyn Greeter>("greeter").await.expect("resolve");
    assert_eq!(greeter.greet(), "local");

    let err = resolver
        .get::<LocalGreeter>("greeter")
        .await
        .err()
        .expect("type mismatch");
    assert!(matches!(err, HubError::InvalidValue(_)));
}

#[tokio::test]
async fn remote_entries_are_dialed() {
    let resolver = Resolver::new();
    resolver.set_dialer(Arc::new(FakeDialer { reachable: true }));
    resolver.register_remote::<dyn Greeter, _>("greeter", "tcp://far:1", remote_greeter);
    let greeter = resolver.get::<dyn Greeter>("greeter").await.expect("resolve");
    assert_eq!(greeter.greet(), "remote via tcp://far:1");

    let failing = Resolver::new();
    failing.set_dialer(Arc::new(FakeDialer { reachable: false }));
    failing.register_remote::<dyn Greeter, _>("greeter", "tcp://far:1", remote_greeter);
    let err = failing.get::<dyn Greeter>("greeter").await.err().expect("dial fails");
    assert!(matches!(err, HubError::Transport(_)));
}

#[tokio::test]
async fn bootstrap_connection_backs_marshallers() {
    let resolver = Resolver::new();
    resolver.register_marshaller::<dyn Greeter, _>("greeter", remote_greeter);
    let err = resolver.get::<dyn Greeter>("greeter").await.err().expect("no bootstrap yet");
    assert!(matches!(err, HubError::NotFound(_)));

    resolver.set_bootstrap(Arc::new(FakeConnection {
        url: "tcp://hub:9000".to_string(),
    }));
    let greeter = resolver.get::<dyn Greeter>("greeter").await.expect("resolve");
    assert_eq!(greeter.greet(), "remote via tcp://hub:9000");

    resolver.unregister("greeter");
    assert!(resolver.get::<dyn Greeter>("greeter").await.is_err());
}

#[tokio::test]
async fn default_resolver_is_shared() {
    let first = default_resolver();
    first.register_local("shared-number", Arc::new(7u32));
    let second = default_resolver();
    let value = second.get::<u32>("shared-number").await.expect("shared");
    assert_eq!(*value, 7);
}
