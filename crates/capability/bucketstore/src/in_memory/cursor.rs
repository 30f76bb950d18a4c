//! 内存快照游标。

use crate::handles::HandleGuard;
use crate::models::KeyValue;
use crate::traits::BucketCursor;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

pub(crate) type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

enum Position {
    Unset,
    At(Vec<u8>),
    BeforeFirst,
    AfterLast,
}

/// 基于写时复制快照的游标，迭代期间的写入不可见。
pub(crate) struct SnapshotCursor {
    snapshot: Arc<Entries>,
    position: Position,
    guard: Option<HandleGuard>,
}

impl SnapshotCursor {
    pub(crate) fn new(snapshot: Arc<Entries>, guard: HandleGuard) -> Self {
        Self {
            snapshot,
            position: Position::Unset,
            guard: Some(guard),
        }
    }

    fn step_forward(&mut self, from: Bound<Vec<u8>>) -> Option<KeyValue> {
        if self.guard.is_none() {
            return None;
        }
        let found = self
            .snapshot
            .range((from, Bound::Unbounded))
            .next()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));
        self.position = match &found {
            Some(item) => Position::At(item.key.clone()),
            None => Position::AfterLast,
        };
        found
    }

    fn step_backward(&mut self, to: Bound<Vec<u8>>) -> Option<KeyValue> {
        if self.guard.is_none() {
            return None;
        }
        let found = self
            .snapshot
            .range((Bound::Unbounded, to))
            .next_back()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));
        self.position = match &found {
            Some(item) => Position::At(item.key.clone()),
            None => Position::BeforeFirst,
        };
        found
    }
}

#[async_trait]
impl BucketCursor for SnapshotCursor {
    async fn first(&mut self) -> Option<KeyValue> {
        self.step_forward(Bound::Unbounded)
    }

    async fn last(&mut self) -> Option<KeyValue> {
        self.step_backward(Bound::Unbounded)
    }

    async fn next(&mut self) -> Option<KeyValue> {
        let from = match &self.position {
            Position::Unset | Position::BeforeFirst => Bound::Unbounded,
            Position::At(key) => Bound::Excluded(key.clone()),
            Position::AfterLast => return None,
        };
        self.step_forward(from)
    }

    async fn prev(&mut self) -> Option<KeyValue> {
        let to = match &self.position {
            Position::Unset | Position::AfterLast => Bound::Unbounded,
            Position::At(key) => Bound::Excluded(key.clone()),
            Position::BeforeFirst => return None,
        };
        self.step_backward(to)
    }

    async fn seek(&mut self, key: &[u8]) -> Option<KeyValue> {
        self.step_forward(Bound::Included(key.to_vec()))
    }

    fn release(&mut self) {
        self.guard = None;
        self.snapshot = Arc::new(Entries::new());
        self.position = Position::AfterLast;
    }
}
