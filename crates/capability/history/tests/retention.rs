use domain::ThingValue;
use domain::time::{millis_to_iso, now_epoch_ms};
use hub_bucketstore::{BucketStore, MemBucketStore};
use hub_history::{
    HistorianConfig, Historian, HistoryService, RetentionPolicy, parse_max_age,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn at_minutes_ago(name: &str, minutes: i64) -> ThingValue {
    let created = millis_to_iso(now_epoch_ms() - minutes * 60_000).expect("timestamp");
    ThingValue::new("dev1", "sensor1", name, minutes.to_string()).with_created(created)
}

#[test]
fn max_age_accepts_seconds_and_units() {
    assert_eq!(parse_max_age("90"), Some(90));
    assert_eq!(parse_max_age("15s"), Some(15));
    assert_eq!(parse_max_age("2m"), Some(120));
    assert_eq!(parse_max_age("3h"), Some(10_800));
    assert_eq!(parse_max_age("7d"), Some(604_800));
    assert_eq!(parse_max_age("7w"), None);
    assert_eq!(parse_max_age(""), None);
}

#[test]
fn first_matching_rule_wins() {
    let policy = RetentionPolicy::from_json(
        r#"[
            {"name":"temperature","publisherID":"dev1","retain":true,"maxAge":"7d"},
            {"name":"heartbeat","retain":false},
            {"name":"*","maxAge":2592000}
        ]"#,
    )
    .expect("parse");
    assert_eq!(policy.rules().len(), 3);
    let rule = policy.find("dev1", "s1", "temperature").expect("rule");
    assert_eq!(rule.max_age_seconds, Some(604_800));
    let rule = policy.find("dev2", "s1", "temperature").expect("wildcard");
    assert_eq!(rule.name, "*");
    assert!(!policy.retain_at_ingest("dev1", "s1", "heartbeat"));
    assert!(policy.retain_at_ingest("dev1", "s1", "other"));
    assert!(RetentionPolicy::default().retain_at_ingest("a", "b", "c"));
    assert!(RetentionPolicy::from_json(r#"[{"name":"x","maxAge":"soon"}]"#).is_err());
}

#[tokio::test]
async fn retention_drops_at_ingest_and_sweeps_expired() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let policy = RetentionPolicy::from_json(
        r#"[
            {"name":"heartbeat","retain":false},
            {"name":"temperature","maxAge":"1h"}
        ]"#,
    )
    .expect("policy");
    let history = Historian::new(
        store.clone(),
        HistorianConfig {
            retention: policy,
            retention_batch: 2,
            ..HistorianConfig::default()
        },
    );
    let writer = history.cap_add_any_thing("test");
    writer
        .add_events(vec![
            at_minutes_ago("heartbeat", 1),
            at_minutes_ago("temperature", 300),
            at_minutes_ago("temperature", 200),
            at_minutes_ago("temperature", 100),
            at_minutes_ago("temperature", 10),
            at_minutes_ago("humidity", 400),
        ])
        .await
        .expect("add");

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    assert_eq!(reader.info().await.expect("info").n_keys, 5);

    let deleted = history
        .sweep_now(&CancellationToken::new())
        .await
        .expect("sweep");
    assert_eq!(deleted, 3);

    let mut cursor = reader.get_event_history("").await.expect("cursor");
    let (left, _) = cursor.next_n(10).await;
    cursor.release();
    let names: Vec<(String, Vec<u8>)> = left.into_iter().map(|v| (v.name, v.data)).collect();
    assert_eq!(
        names,
        vec![
            ("humidity".to_string(), b"400".to_vec()),
            ("temperature".to_string(), b"10".to_vec()),
        ]
    );

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(history.sweep_now(&cancelled).await.is_err());
    assert_eq!(store.outstanding_handles(), 0);
}

#[tokio::test]
async fn prune_removes_records_before_timestamp() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let history = Historian::new(store.clone(), HistorianConfig::default());
    let writer = history.cap_add_history("dev1", "dev1", "sensor1");
    for minutes in [50, 40, 30, 20, 10] {
        writer
            .add_event(at_minutes_ago("temp", minutes))
            .await
            .expect("add");
    }
    let before = millis_to_iso(now_epoch_ms() - 25 * 60_000).expect("timestamp");
    let deleted = history
        .prune("dev1", "sensor1", &before)
        .await
        .expect("prune");
    assert_eq!(deleted, 3);
    assert!(history.prune("dev1", "sensor1", "yesterday").await.is_err());
    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    assert_eq!(reader.info().await.expect("info").n_keys, 2);
    assert_eq!(store.outstanding_handles(), 0);
}
