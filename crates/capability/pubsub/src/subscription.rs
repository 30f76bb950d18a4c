//! 订阅句柄与能力持有的订阅集合。

use crate::bus::PubSubCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// 订阅句柄；释放后不再投递，重复释放无副作用。
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: String,
    pattern: String,
    core: Arc<PubSubCore>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: String, pattern: String, core: Arc<PubSubCore>) -> Self {
        Self { id, pattern, core }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn release(&self) {
        self.core.unsubscribe(&self.id);
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// 能力拥有的订阅 ID 集合。
pub(crate) struct SubscriptionSet {
    core: Arc<PubSubCore>,
    ids: Mutex<Vec<String>>,
    released: AtomicBool,
}

impl SubscriptionSet {
    pub(crate) fn new(core: Arc<PubSubCore>) -> Self {
        Self {
            core,
            ids: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn core(&self) -> &Arc<PubSubCore> {
        &self.core
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// 登记一个订阅并返回句柄。
    pub(crate) fn track(&self, id: String, pattern: String) -> SubscriptionHandle {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.push(id.clone());
        SubscriptionHandle::new(id, pattern, self.core.clone())
    }

    /// 仍然有效的订阅数（单独释放的句柄不计入）。
    pub(crate) fn count(&self) -> usize {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|id| self.core.contains(id))
            .count()
    }

    /// 释放全部订阅。
    pub(crate) fn release_all(&self) {
        self.released.store(true, Ordering::Release);
        let ids = std::mem::take(&mut *self.ids.lock().unwrap_or_else(PoisonError::into_inner));
        for id in ids {
            self.core.unsubscribe(&id);
        }
    }
}
