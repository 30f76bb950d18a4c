//! 发布/订阅核心。
//!
//! 每个订阅拥有一个有界队列和一个专属任务：发布只负责入队，任务按入队顺序串行调用
//! 处理器。队列满时丢弃最旧的未投递值并告警，慢订阅者不会阻塞发布者或其他订阅者。

use crate::handler::ValueHandler;
use crate::router::TopicRouter;
use domain::{HubError, ThingValue};
use hub_telemetry::{record_dropped_backpressure, record_value_delivered, record_value_published};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// 核心配置。
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// 每个订阅的队列上限。
    pub queue_capacity: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl PubSubConfig {
    fn sanitized(mut self) -> Self {
        if self.queue_capacity == 0 {
            self.queue_capacity = 1;
        }
        self
    }
}

/// 单个订阅：有界队列 + 唤醒信号。
struct Subscriber {
    id: String,
    pattern: String,
    capacity: usize,
    queue: Mutex<VecDeque<ThingValue>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Subscriber {
    fn new(id: String, pattern: String, capacity: usize) -> Self {
        Self {
            id,
            pattern,
            capacity,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn enqueue(&self, value: ThingValue) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let dropped = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(value);
            dropped
        };
        if let Some(dropped) = dropped {
            warn!(
                target: "hub.pubsub",
                subscription_id = %self.id,
                pattern = %self.pattern,
                dropped_name = %dropped.name,
                dropped_created = %dropped.created,
                "subscriber_queue_overflow"
            );
            record_dropped_backpressure();
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<ThingValue> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.notify.notify_one();
    }

    async fn run(self: Arc<Self>, handler: Arc<dyn ValueHandler>) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            match self.pop() {
                Some(value) => {
                    handler.handle(value).await;
                    record_value_delivered();
                }
                None => self.notify.notified().await,
            }
        }
        debug!(target: "hub.pubsub", subscription_id = %self.id, "subscriber_task_stopped");
    }
}

/// 发布/订阅核心，能力对象共享同一实例。
pub struct PubSubCore {
    config: PubSubConfig,
    router: RwLock<TopicRouter<Arc<Subscriber>>>,
}

impl PubSubCore {
    pub fn new(config: PubSubConfig) -> Self {
        Self {
            config: config.sanitized(),
            router: RwLock::new(TopicRouter::new()),
        }
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    /// 把值放入所有匹配订阅的队列，返回匹配数。不做授权检查，由能力层负责。
    pub fn publish(&self, topic: &str, value: &ThingValue) -> usize {
        let router = self.router.read().unwrap_or_else(PoisonError::into_inner);
        let targets = router.matching(topic);
        for subscriber in &targets {
            subscriber.enqueue(value.clone());
        }
        record_value_published();
        debug!(target: "hub.pubsub", topic, subscribers = targets.len(), "value_published");
        targets.len()
    }

    /// 登记订阅并启动其投递任务，返回订阅 ID。需要在 tokio 运行时内调用。
    pub fn subscribe(&self, pattern: &str, handler: Arc<dyn ValueHandler>) -> Result<String, HubError> {
        if pattern.is_empty() || pattern.split('/').any(str::is_empty) {
            return Err(HubError::invalid(format!("invalid subscription pattern: {pattern}")));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| HubError::Transport(format!("no async runtime: {err}")))?;
        let id = uuid::Uuid::new_v4().to_string();
        let subscriber = Arc::new(Subscriber::new(
            id.clone(),
            pattern.to_string(),
            self.config.queue_capacity,
        ));
        {
            let mut router = self
                .router
                .write()
                .map_err(|_| HubError::StoreIo("lock failed".to_string()))?;
            router.insert(id.clone(), pattern, subscriber.clone());
        }
        runtime.spawn(subscriber.run(handler));
        debug!(target: "hub.pubsub", subscription_id = %id, pattern, "subscribed");
        Ok(id)
    }

    /// 移除订阅；未投递的值被丢弃。重复调用返回 false。
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self
            .router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(subscriber) => {
                subscriber.close();
                debug!(target: "hub.pubsub", subscription_id = %id, "unsubscribed");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 关闭所有订阅。
    pub fn shutdown(&self) {
        let subscribers = self
            .router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();
        for subscriber in subscribers {
            subscriber.close();
        }
    }
}

impl Default for PubSubCore {
    fn default() -> Self {
        Self::new(PubSubConfig::default())
    }
}
