//! 保留策略与清理。
//!
//! 规则按顺序匹配，第一条命中者生效：`retain = false` 在写入时丢弃，
//! `maxAge` 由周期清理删除过期记录。没有规则命中的值永久保留。

use crate::keys::HistoryKey;
use domain::{HubError, ThingAddr};
use hub_bucketstore::BucketStore;
use hub_telemetry::record_retention_deleted;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 匹配所有名称的规则名。
pub const ANY_NAME: &str = "*";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaxAgeWire {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RuleWire {
    name: String,
    #[serde(rename = "publisherID", default)]
    publisher_id: Option<String>,
    #[serde(rename = "thingID", default)]
    thing_id: Option<String>,
    #[serde(default = "default_retain")]
    retain: bool,
    #[serde(rename = "maxAge", default)]
    max_age: Option<MaxAgeWire>,
}

fn default_retain() -> bool {
    true
}

/// 单条保留规则。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionRule {
    pub name: String,
    pub publisher_id: Option<String>,
    pub thing_id: Option<String>,
    pub retain: bool,
    /// 最长保留秒数。
    pub max_age_seconds: Option<u64>,
}

impl RetentionRule {
    pub fn matches(&self, publisher_id: &str, thing_id: &str, name: &str) -> bool {
        (self.name == ANY_NAME || self.name == name)
            && self.publisher_id.as_deref().is_none_or(|p| p == publisher_id)
            && self.thing_id.as_deref().is_none_or(|t| t == thing_id)
    }

    /// 早于该毫秒时间的记录应删除。
    fn cutoff(&self, now_ms: i64) -> Option<i64> {
        if !self.retain {
            return Some(now_ms);
        }
        let age = i64::try_from(self.max_age_seconds?).ok()?;
        Some(now_ms.saturating_sub(age.saturating_mul(1000)))
    }

    fn could_match_thing(&self, addr: &ThingAddr) -> bool {
        self.publisher_id.as_deref().is_none_or(|p| p == addr.publisher_id)
            && self.thing_id.as_deref().is_none_or(|t| t == addr.thing_id)
    }
}

/// 解析 `maxAge`：整数秒，或数字后跟 `s`/`m`/`h`/`d`。
pub fn parse_max_age(text: &str) -> Option<u64> {
    let text = text.trim();
    let (digits, unit) = match text.char_indices().last()? {
        (idx, c) if c.is_ascii_alphabetic() => (&text[..idx], c),
        _ => (text, 's'),
    };
    let amount: u64 = digits.trim().parse().ok()?;
    let factor = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        _ => return None,
    };
    amount.checked_mul(factor)
}

/// 有序规则表。
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    rules: Vec<RetentionRule>,
}

impl RetentionPolicy {
    pub fn new(rules: Vec<RetentionRule>) -> Self {
        Self { rules }
    }

    pub fn from_json(text: &str) -> Result<Self, HubError> {
        let wire: Vec<RuleWire> = serde_json::from_str(text)
            .map_err(|err| HubError::invalid(format!("retention config: {err}")))?;
        let mut rules = Vec::with_capacity(wire.len());
        for rule in wire {
            if rule.name.is_empty() {
                return Err(HubError::invalid("retention rule without name"));
            }
            let max_age_seconds = match rule.max_age {
                None => None,
                Some(MaxAgeWire::Seconds(seconds)) => Some(seconds),
                Some(MaxAgeWire::Text(text)) => Some(parse_max_age(&text).ok_or_else(|| {
                    HubError::invalid(format!("retention maxAge for {}: {text}", rule.name))
                })?),
            };
            rules.push(RetentionRule {
                name: rule.name,
                publisher_id: rule.publisher_id.filter(|p| !p.is_empty()),
                thing_id: rule.thing_id.filter(|t| !t.is_empty()),
                retain: rule.retain,
                max_age_seconds,
            });
        }
        Ok(Self { rules })
    }

    pub async fn load(path: &Path) -> Result<Self, HubError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| HubError::StoreIo(format!("{}: {err}", path.display())))?;
        let policy = Self::from_json(&text)?;
        info!(
            target: "hub.history",
            path = %path.display(),
            rules = policy.rules.len(),
            "retention_loaded"
        );
        Ok(policy)
    }

    pub fn rules(&self) -> &[RetentionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 第一条命中的规则。
    pub fn find(&self, publisher_id: &str, thing_id: &str, name: &str) -> Option<&RetentionRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(publisher_id, thing_id, name))
    }

    /// 写入时是否保留。
    pub fn retain_at_ingest(&self, publisher_id: &str, thing_id: &str, name: &str) -> bool {
        self.find(publisher_id, thing_id, name)
            .is_none_or(|rule| rule.retain)
    }

    fn cutoff(&self, addr: &ThingAddr, name: &str, now_ms: i64) -> Option<i64> {
        self.find(&addr.publisher_id, &addr.thing_id, name)?
            .cutoff(now_ms)
    }

    /// 该 Thing 所有可能命中规则中最晚的截止时间；之后的记录无需扫描。
    fn max_cutoff(&self, addr: &ThingAddr, now_ms: i64) -> Option<i64> {
        self.rules
            .iter()
            .filter(|rule| rule.could_match_thing(addr))
            .filter_map(|rule| rule.cutoff(now_ms))
            .max()
    }
}

/// 按截止函数删除一个 Thing 桶中的记录，返回删除条数。
pub(crate) async fn delete_expired<F>(
    store: &Arc<dyn BucketStore>,
    bucket_id: &str,
    scan_until: i64,
    batch_size: usize,
    cancel: &CancellationToken,
    expired: F,
) -> Result<u64, HubError>
where
    F: Fn(&HistoryKey) -> bool,
{
    let batch_size = batch_size.max(1);
    let mut bucket = store.get_bucket(bucket_id)?;
    let mut cursor = bucket.cursor().await?;
    let mut pending: Vec<Vec<u8>> = Vec::with_capacity(batch_size);
    let mut deleted = 0u64;
    let mut item = cursor.first().await;
    while let Some(current) = item {
        if cancel.is_cancelled() {
            cursor.release();
            bucket.close();
            return Err(HubError::Cancelled);
        }
        if let Some(key) = HistoryKey::decode(&current.key) {
            if key.millis >= scan_until {
                break;
            }
            if expired(&key) {
                pending.push(current.key);
            }
        }
        if pending.len() >= batch_size {
            bucket.delete_multiple(&pending).await?;
            deleted += pending.len() as u64;
            pending.clear();
        }
        item = cursor.next().await;
    }
    cursor.release();
    if !pending.is_empty() {
        bucket.delete_multiple(&pending).await?;
        deleted += pending.len() as u64;
    }
    bucket.close();
    Ok(deleted)
}

/// 对所有 Thing 桶执行一次保留清理。
pub(crate) async fn sweep(
    store: &Arc<dyn BucketStore>,
    policy: &RetentionPolicy,
    batch_size: usize,
    now_ms: i64,
    cancel: &CancellationToken,
) -> Result<u64, HubError> {
    if policy.is_empty() {
        return Ok(0);
    }
    let mut total = 0u64;
    for bucket_id in store.bucket_ids().await? {
        let Some(addr) = ThingAddr::parse(&bucket_id) else {
            continue;
        };
        let Some(scan_until) = policy.max_cutoff(&addr, now_ms) else {
            continue;
        };
        let deleted = delete_expired(store, &bucket_id, scan_until, batch_size, cancel, |key| {
            policy
                .cutoff(&addr, &key.name, now_ms)
                .is_some_and(|cutoff| key.millis < cutoff)
        })
        .await?;
        if deleted > 0 {
            record_retention_deleted(deleted);
            debug!(target: "hub.history", thing = %bucket_id, deleted, "retention_bucket_swept");
        }
        total += deleted;
    }
    Ok(total)
}
