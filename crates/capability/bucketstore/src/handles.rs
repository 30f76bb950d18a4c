//! 句柄计数：每个打开的桶与游标持有一个守卫，守卫释放时计数递减。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 存储级未释放句柄计数器。
#[derive(Debug, Clone, Default)]
pub struct HandleCounter {
    open: Arc<AtomicUsize>,
}

impl HandleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个新句柄。
    pub fn acquire(&self) -> HandleGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        HandleGuard {
            open: self.open.clone(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

/// 单个句柄的守卫。
#[derive(Debug)]
pub struct HandleGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
