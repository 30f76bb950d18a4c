use crate::keys::{HistoryKey, seek_key};
use crate::traits::HistoryCursor;
use async_trait::async_trait;
use domain::time::{millis_to_iso, parse_iso_millis};
use domain::{ThingAddr, ThingValue};
use hub_bucketstore::{BucketCursor, KeyValue};
use tracing::warn;

/// Thing 桶上的历史游标，按名称过滤。
pub(crate) struct ThingHistoryCursor {
    inner: Box<dyn BucketCursor>,
    addr: ThingAddr,
    name: Option<String>,
}

impl ThingHistoryCursor {
    pub(crate) fn new(inner: Box<dyn BucketCursor>, addr: ThingAddr, name: &str) -> Self {
        Self {
            inner,
            addr,
            name: (!name.is_empty()).then(|| name.to_string()),
        }
    }

    /// 由桶地址、记录键与数据载荷还原信封。
    fn accept(&self, item: &KeyValue) -> Option<(HistoryKey, ThingValue)> {
        let decoded = HistoryKey::decode(&item.key)
            .and_then(|key| millis_to_iso(key.millis).map(|created| (key, created)));
        let Some((key, created)) = decoded else {
            warn!(
                target: "hub.history",
                thing = %self.addr,
                key = %String::from_utf8_lossy(&item.key),
                "history_record_decode_failed"
            );
            return None;
        };
        if let Some(name) = &self.name {
            if &key.name != name {
                return None;
            }
        }
        let value = ThingValue {
            publisher_id: self.addr.publisher_id.clone(),
            thing_id: self.addr.thing_id.clone(),
            name: key.name.clone(),
            data: item.value.clone(),
            created,
        };
        Some((key, value))
    }

    async fn forward(&mut self, mut item: Option<KeyValue>) -> Option<(HistoryKey, ThingValue)> {
        while let Some(current) = item {
            if let Some(found) = self.accept(&current) {
                return Some(found);
            }
            item = self.inner.next().await;
        }
        None
    }

    async fn backward(&mut self, mut item: Option<KeyValue>) -> Option<(HistoryKey, ThingValue)> {
        while let Some(current) = item {
            if let Some(found) = self.accept(&current) {
                return Some(found);
            }
            item = self.inner.prev().await;
        }
        None
    }

    async fn next_record(&mut self) -> Option<(HistoryKey, ThingValue)> {
        let item = self.inner.next().await;
        self.forward(item).await
    }

    async fn prev_record(&mut self) -> Option<(HistoryKey, ThingValue)> {
        let item = self.inner.prev().await;
        self.backward(item).await
    }
}

#[async_trait]
impl HistoryCursor for ThingHistoryCursor {
    async fn first(&mut self) -> Option<ThingValue> {
        let item = self.inner.first().await;
        self.forward(item).await.map(|(_, value)| value)
    }

    async fn last(&mut self) -> Option<ThingValue> {
        let item = self.inner.last().await;
        self.backward(item).await.map(|(_, value)| value)
    }

    async fn next(&mut self) -> Option<ThingValue> {
        self.next_record().await.map(|(_, value)| value)
    }

    async fn prev(&mut self) -> Option<ThingValue> {
        self.prev_record().await.map(|(_, value)| value)
    }

    async fn seek(&mut self, timestamp: &str) -> Option<ThingValue> {
        let millis = parse_iso_millis(timestamp)?;
        let item = self.inner.seek(&seek_key(millis)).await;
        self.forward(item).await.map(|(_, value)| value)
    }

    async fn next_n(&mut self, n: usize) -> (Vec<ThingValue>, bool) {
        let mut values = Vec::with_capacity(n.min(1024));
        while values.len() < n {
            match self.next_record().await {
                Some((_, value)) => values.push(value),
                None => return (values, false),
            }
        }
        // 预读一条判断剩余，再退回原位
        let remaining = self.next_record().await.is_some();
        if remaining {
            self.prev_record().await;
        }
        (values, remaining)
    }

    async fn next_n_until(&mut self, n: usize, until: &str) -> (Vec<ThingValue>, bool) {
        let Some(until_ms) = parse_iso_millis(until) else {
            return (Vec::new(), false);
        };
        let mut values = Vec::with_capacity(n.min(1024));
        while values.len() < n {
            match self.next_record().await {
                Some((key, _)) if key.millis > until_ms => {
                    self.prev_record().await;
                    return (values, false);
                }
                Some((_, value)) => values.push(value),
                None => return (values, false),
            }
        }
        match self.next_record().await {
            Some((key, _)) => {
                self.prev_record().await;
                (values, key.millis <= until_ms)
            }
            None => (values, false),
        }
    }

    async fn prev_n(&mut self, n: usize) -> (Vec<ThingValue>, bool) {
        let mut values = Vec::with_capacity(n.min(1024));
        while values.len() < n {
            match self.prev_record().await {
                Some((_, value)) => values.push(value),
                None => return (values, false),
            }
        }
        let remaining = self.prev_record().await.is_some();
        if remaining {
            self.next_record().await;
        }
        (values, remaining)
    }

    fn release(&mut self) {
        self.inner.release();
    }
}
