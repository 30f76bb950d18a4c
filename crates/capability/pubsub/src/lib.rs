//! # Hub 发布/订阅模块
//!
//! 按主题 `things/{publisherID}/{thingID}/{msgType}/{name}` 在组件之间分发 `ThingValue`。
//!
//! ## 组成
//!
//! - `router`：单层通配符 `+` 的主题匹配与订阅登记
//! - `bus`：每订阅一个有界队列与投递任务（队列满时丢弃最旧值）
//! - `device` / `user` / `service`：三种能力形态，授权在此层检查
//!
//! ## 投递保证
//!
//! - 同一订阅的处理器串行调用
//! - 同一发布者在同一主题上的发布按顺序投递
//! - 发布不会因订阅者原因失败

pub mod bus;
pub mod handler;
pub mod router;

mod capability;
mod device;
mod service;
mod subscription;
mod user;

pub use crate::bus::{PubSubConfig, PubSubCore};
pub use device::DevicePubSub;
pub use handler::{ChannelHandler, FnHandler, ValueHandler, channel_handler, handler_fn};
pub use router::{TopicPattern, TopicRouter, topic_matches};
pub use service::ServicePubSub;
pub use subscription::SubscriptionHandle;
pub use user::UserPubSub;

use hub_auth::ThingAuthorizer;
use std::sync::Arc;
use tracing::info;

/// 能力解析器中的登记名。
pub const CAPABILITY_NAME: &str = "pubsub";

/// 发布/订阅服务：持有核心与授权器，按客户端类型签发能力。
pub struct PubSubService {
    core: Arc<PubSubCore>,
    authorizer: Arc<dyn ThingAuthorizer>,
}

impl PubSubService {
    pub fn new(config: PubSubConfig, authorizer: Arc<dyn ThingAuthorizer>) -> Self {
        info!(
            target: "hub.pubsub",
            queue_capacity = config.queue_capacity,
            "pubsub_started"
        );
        Self {
            core: Arc::new(PubSubCore::new(config)),
            authorizer,
        }
    }

    pub fn core(&self) -> Arc<PubSubCore> {
        self.core.clone()
    }

    pub fn cap_device_pubsub(&self, device_id: &str) -> DevicePubSub {
        DevicePubSub::new(device_id.to_string(), self.core.clone())
    }

    pub fn cap_user_pubsub(&self, user_id: &str) -> UserPubSub {
        UserPubSub::new(user_id.to_string(), self.authorizer.clone(), self.core.clone())
    }

    pub fn cap_service_pubsub(&self, service_id: &str) -> ServicePubSub {
        ServicePubSub::new(service_id.to_string(), self.core.clone())
    }

    /// 关闭所有订阅。
    pub fn stop(&self) {
        self.core.shutdown();
        info!(target: "hub.pubsub", "pubsub_stopped");
    }
}
