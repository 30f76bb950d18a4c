//! 能力解析器：按接口名查找能力。
//!
//! 三种登记形态：
//! - 本地服务：直接返回登记的 `Arc<T>`
//! - 远程服务（已知 URL）：通过 `Dialer` 建立连接，再由构造函数包装
//! - 引导连接：由 marshaller 构造函数包装共享的 `RpcConnection`
//!
//! 查找顺序为本地、URL、引导连接。组件只依赖解析器，因此同一业务代码可以在进程内
//! 或跨网络装配，测试中也可以替换为桩实现。

use async_trait::async_trait;
use domain::HubError;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info};

/// 通用 RPC 连接，远程能力的包装器基于它发起调用。
#[async_trait]
pub trait RpcConnection: Send + Sync {
    fn url(&self) -> &str;

    async fn call(&self, capability: &str, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, HubError>;
}

/// 按 URL 建立 RPC 连接。
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Arc<dyn RpcConnection>, HubError>;
}

type AnyCapability = Box<dyn Any + Send + Sync>;
type Constructor = Arc<dyn Fn(Arc<dyn RpcConnection>) -> AnyCapability + Send + Sync>;

fn wrap<T, F>(ctor: F) -> Constructor
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<dyn RpcConnection>) -> Arc<T> + Send + Sync + 'static,
{
    Arc::new(move |conn| Box::new(ctor(conn)) as AnyCapability)
}

#[derive(Default)]
struct Registry {
    local: HashMap<String, AnyCapability>,
    remote: HashMap<String, (String, Constructor)>,
    marshallers: HashMap<String, Constructor>,
    bootstrap: Option<Arc<dyn RpcConnection>>,
    dialer: Option<Arc<dyn Dialer>>,
}

/// 能力解析器。
#[derive(Default)]
pub struct Resolver {
    registry: RwLock<Registry>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记本地服务，覆盖同名旧登记。
    pub fn register_local<T>(&self, name: &str, capability: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.write().local.insert(name.to_string(), Box::new(capability));
        debug!(target: "hub.resolver", name, "local_registered");
    }

    /// 登记远程服务地址与包装构造函数。
    pub fn register_remote<T, F>(&self, name: &str, url: &str, ctor: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<dyn RpcConnection>) -> Arc<T> + Send + Sync + 'static,
    {
        self.write()
            .remote
            .insert(name.to_string(), (url.to_string(), wrap(ctor)));
        debug!(target: "hub.resolver", name, url, "remote_registered");
    }

    /// 登记基于引导连接的包装构造函数。
    pub fn register_marshaller<T, F>(&self, name: &str, ctor: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<dyn RpcConnection>) -> Arc<T> + Send + Sync + 'static,
    {
        self.write()
            .marshallers
            .insert(name.to_string(), wrap(ctor));
    }

    pub fn set_bootstrap(&self, connection: Arc<dyn RpcConnection>) {
        info!(target: "hub.resolver", url = connection.url(), "bootstrap_set");
        self.write().bootstrap = Some(connection);
    }

    pub fn set_dialer(&self, dialer: Arc<dyn Dialer>) {
        self.write().dialer = Some(dialer);
    }

    /// 移除本地与远程登记。
    pub fn unregister(&self, name: &str) {
        let mut registry = self.write();
        registry.local.remove(name);
        registry.remote.remove(name);
        registry.marshallers.remove(name);
    }

    /// 查找能力：本地 → URL → 引导连接。
    pub async fn get<T>(&self, name: &str) -> Result<Arc<T>, HubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (remote, dialer, marshalled) = {
            let registry = self.read();
            if let Some(entry) = registry.local.get(name) {
                return entry
                    .downcast_ref::<Arc<T>>()
                    .cloned()
                    .ok_or_else(|| type_mismatch(name));
            }
            let marshalled = registry
                .marshallers
                .get(name)
                .cloned()
                .zip(registry.bootstrap.clone());
            (
                registry.remote.get(name).cloned(),
                registry.dialer.clone(),
                marshalled,
            )
        };

        if let Some((url, ctor)) = remote {
            let dialer = dialer
                .ok_or_else(|| HubError::Transport(format!("no dialer for {name} at {url}")))?;
            let connection = dialer
                .dial(&url)
                .await
                .map_err(|err| HubError::Transport(format!("dial {url}: {err}")))?;
            debug!(target: "hub.resolver", name, url = %url, "remote_resolved");
            return downcast(name, ctor(connection));
        }
        if let Some((ctor, bootstrap)) = marshalled {
            return downcast(name, ctor(bootstrap));
        }
        Err(HubError::NotFound(format!("capability {name}")))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn downcast<T>(name: &str, capability: AnyCapability) -> Result<Arc<T>, HubError>
where
    T: ?Sized + Send + Sync + 'static,
{
    capability
        .downcast::<Arc<T>>()
        .map(|boxed| *boxed)
        .map_err(|_| type_mismatch(name))
}

fn type_mismatch(name: &str) -> HubError {
    HubError::invalid(format!("capability {name} is registered with a different type"))
}

static DEFAULT_RESOLVER: OnceLock<Arc<Resolver>> = OnceLock::new();

/// 进程级默认解析器，仅供顶层可执行程序使用。
pub fn default_resolver() -> Arc<Resolver> {
    DEFAULT_RESOLVER
        .get_or_init(|| Arc::new(Resolver::new()))
        .clone()
}
