use crate::traits::DirectoryCursor;
use async_trait::async_trait;
use domain::ThingValue;
use hub_bucketstore::{BucketCursor, KeyValue};
use tracing::warn;

/// 包装桶游标：解码条目、按发布者过滤，并保留一条预读用于判断剩余。
pub(crate) struct TdCursor {
    inner: Box<dyn BucketCursor>,
    publisher_id: Option<String>,
    lookahead: Option<ThingValue>,
}

impl TdCursor {
    pub(crate) fn new(inner: Box<dyn BucketCursor>, publisher_id: Option<String>) -> Self {
        Self {
            inner,
            publisher_id,
            lookahead: None,
        }
    }

    fn accept(&self, item: KeyValue) -> Option<ThingValue> {
        let value = match ThingValue::decode(&item.value) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    target: "hub.directory",
                    key = %String::from_utf8_lossy(&item.key),
                    error = %err,
                    "td_decode_failed"
                );
                return None;
            }
        };
        match &self.publisher_id {
            Some(publisher_id) if &value.publisher_id != publisher_id => None,
            _ => Some(value),
        }
    }

    async fn advance(&mut self, mut item: Option<KeyValue>) -> Option<ThingValue> {
        while let Some(current) = item {
            if let Some(value) = self.accept(current) {
                return Some(value);
            }
            item = self.inner.next().await;
        }
        None
    }
}

#[async_trait]
impl DirectoryCursor for TdCursor {
    async fn first(&mut self) -> Option<ThingValue> {
        self.lookahead = None;
        let item = self.inner.first().await;
        self.advance(item).await
    }

    async fn next(&mut self) -> Option<ThingValue> {
        if let Some(value) = self.lookahead.take() {
            return Some(value);
        }
        let item = self.inner.next().await;
        self.advance(item).await
    }

    async fn next_n(&mut self, n: usize) -> (Vec<ThingValue>, bool) {
        let mut values = Vec::with_capacity(n.min(1024));
        while values.len() < n {
            match self.next().await {
                Some(value) => values.push(value),
                None => return (values, false),
            }
        }
        self.lookahead = self.next().await;
        let remaining = self.lookahead.is_some();
        (values, remaining)
    }

    fn release(&mut self) {
        self.lookahead = None;
        self.inner.release();
    }
}
