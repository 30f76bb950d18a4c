use domain::time::{millis_to_iso, now_epoch_ms};
use domain::{HubError, ThingValue};
use hub_auth::AllowAll;
use hub_bucketstore::{BucketStore, MemBucketStore, SqliteBucketStore};
use hub_history::{Historian, HistorianConfig, HistoryKey, HistoryService, LATEST_BUCKET, RecordKind};
use hub_pubsub::{PubSubConfig, PubSubService};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn minutes_ago(minutes: i64) -> String {
    millis_to_iso(now_epoch_ms() - minutes * 60_000).expect("valid timestamp")
}

fn event(name: &str, data: &str, created: &str) -> ThingValue {
    ThingValue::new("dev1", "sensor1", name, data).with_created(created)
}

fn historian(store: Arc<dyn BucketStore>) -> Historian {
    Historian::new(store, HistorianConfig::default())
}

#[tokio::test]
async fn range_read_starts_at_seek_position() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let history = historian(store.clone());
    let writer = history.cap_add_any_thing("test");
    writer
        .add_events(vec![
            event("humidity", "70", &minutes_ago(60)),
            event("humidity", "55", &minutes_ago(5)),
        ])
        .await
        .expect("add");

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let mut cursor = reader.get_event_history("").await.expect("cursor");
    let first = cursor.seek(&minutes_ago(30)).await.expect("record after start");
    assert_eq!(first.data, b"55".to_vec());
    assert!(cursor.next().await.is_none());
    cursor.release();
    assert_eq!(store.outstanding_handles(), 0);
}

#[tokio::test]
async fn cursor_filters_by_name_and_reports_remaining() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let history = historian(store.clone());
    let writer = history.cap_add_history("dev1", "dev1", "sensor1");
    for minute in (1..=10).rev() {
        writer
            .add_event(event("temp", &minute.to_string(), &minutes_ago(minute)))
            .await
            .expect("temp");
        writer
            .add_event(event("hum", "x", &minutes_ago(minute)))
            .await
            .expect("hum");
    }
    writer
        .add_action(event("reset", "now", &minutes_ago(3)))
        .await
        .expect("action");

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let mut cursor = reader.get_event_history("temp").await.expect("cursor");
    let (page, remaining) = cursor.next_n(4).await;
    assert_eq!(
        page.iter().map(|v| v.data.clone()).collect::<Vec<_>>(),
        vec![b"10".to_vec(), b"9".to_vec(), b"8".to_vec(), b"7".to_vec()]
    );
    assert!(remaining);
    let (page, remaining) = cursor.next_n(10).await;
    assert_eq!(page.len(), 6);
    assert!(!remaining);
    assert!(page.iter().all(|v| v.name == "temp"));

    let last = cursor.last().await.expect("last");
    assert_eq!(last.data, b"1".to_vec());
    let prev = cursor.prev().await.expect("prev");
    assert_eq!(prev.data, b"2".to_vec());
    let (back, more) = cursor.prev_n(3).await;
    assert_eq!(back.len(), 3);
    assert!(more);
    let first = cursor.first().await.expect("first");
    assert_eq!(first.data, b"10".to_vec());
    cursor.release();

    let mut all = reader.get_event_history("").await.expect("cursor");
    let (everything, _) = all.next_n(100).await;
    assert_eq!(everything.len(), 21);
    all.release();

    let info = reader.info().await.expect("info");
    assert_eq!(info.n_keys, 21);
}

#[tokio::test]
async fn next_n_until_stops_at_upper_bound() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let history = historian(store);
    let writer = history.cap_add_any_thing("test");
    let batch = (1..=6)
        .rev()
        .map(|minute| event("temp", &minute.to_string(), &minutes_ago(minute * 10)))
        .collect();
    writer.add_events(batch).await.expect("add");

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let mut cursor = reader.get_event_history("temp").await.expect("cursor");
    let first = cursor.seek(&minutes_ago(55)).await.expect("seek");
    assert_eq!(first.data, b"5".to_vec());
    let until = minutes_ago(25);
    let (page, remaining) = cursor.next_n_until(10, &until).await;
    assert_eq!(
        page.iter().map(|v| v.data.clone()).collect::<Vec<_>>(),
        vec![b"4".to_vec(), b"3".to_vec()]
    );
    assert!(!remaining);
    // 位置停在最后返回的记录上
    let next = cursor.next().await.expect("next after range");
    assert_eq!(next.data, b"2".to_vec());

    let mut cursor = reader.get_event_history("temp").await.expect("cursor");
    cursor.seek(&minutes_ago(65)).await.expect("seek");
    let (page, remaining) = cursor.next_n_until(2, &until).await;
    assert_eq!(page.len(), 2);
    assert!(remaining);
}

#[tokio::test]
async fn empty_thing_yields_empty_cursor() {
    let history = historian(Arc::new(MemBucketStore::new()));
    let reader = history.cap_read_history("user1", "nobody", "nothing");
    let mut cursor = reader.get_event_history("").await.expect("cursor");
    assert!(cursor.seek(&minutes_ago(1)).await.is_none());
    assert!(cursor.first().await.is_none());
    let (page, remaining) = cursor.next_n(5).await;
    assert!(page.is_empty());
    assert!(!remaining);
    cursor.release();
}

#[tokio::test]
async fn invalid_values_reject_the_whole_batch() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let history = historian(store);
    let writer = history.cap_add_any_thing("test");
    let err = writer
        .add_events(vec![
            event("temp", "1", &minutes_ago(2)),
            ThingValue::new("dev1", "", "temp", "2"),
        ])
        .await
        .expect_err("missing thing id");
    assert!(matches!(err, HubError::InvalidValue(_)));
    let err = writer
        .add_event(ThingValue::new("dev1", "sensor1", "", "2"))
        .await
        .expect_err("missing name");
    assert!(matches!(err, HubError::InvalidValue(_)));

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let mut cursor = reader.get_event_history("").await.expect("cursor");
    assert!(cursor.first().await.is_none());
    cursor.release();

    let scoped = history.cap_add_history("dev1", "dev1", "sensor1");
    let err = scoped
        .add_event(ThingValue::new("dev1", "sensor2", "temp", "1"))
        .await
        .expect_err("other thing");
    assert!(matches!(err, HubError::NotPermitted(_)));
}

#[tokio::test]
async fn created_is_repaired_or_normalized() {
    let history = historian(Arc::new(MemBucketStore::new()));
    let writer = history.cap_add_any_thing("test");
    writer
        .add_event(event("empty", "1", ""))
        .await
        .expect("empty created");
    writer
        .add_event(event("garbage", "1", "not a time"))
        .await
        .expect("malformed created");
    writer
        .add_event(event("offset", "1", "2024-01-01T12:00:00.000+0200"))
        .await
        .expect("offset created");

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let latest = reader.get_properties(&[]).await.expect("latest");
    let by_name: BTreeMap<String, ThingValue> =
        latest.into_iter().map(|v| (v.name.clone(), v)).collect();
    assert_eq!(by_name["offset"].created, "2024-01-01T10:00:00.000Z");
    let now = now_epoch_ms();
    for name in ["empty", "garbage"] {
        let millis = by_name[name].created_millis().expect("parseable");
        assert!((now - millis).abs() < 60_000, "{name} stamped with current time");
    }
}

#[tokio::test]
async fn latest_value_keeps_newest_created() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.db");
    let store: Arc<dyn BucketStore> = Arc::new(SqliteBucketStore::open(&path).await.expect("open"));
    let history = historian(store.clone());
    let writer = history.cap_add_any_thing("test");
    let newer = minutes_ago(1);
    writer
        .add_event(event("temperature", "10", &minutes_ago(10)))
        .await
        .expect("add");
    writer
        .add_event(event("temperature", "12", &newer))
        .await
        .expect("add");
    // 乱序到达的旧值不覆盖
    writer
        .add_event(event("temperature", "8", &minutes_ago(20)))
        .await
        .expect("add");

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let latest = reader
        .get_properties(&["temperature".to_string()])
        .await
        .expect("latest");
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].data, b"12".to_vec());
    assert_eq!(latest[0].created, newer);

    assert_eq!(history.flush_latest().await.expect("flush"), 1);
    assert_eq!(history.flush_latest().await.expect("flush again"), 0);
    store.close().await.expect("close");

    let store: Arc<dyn BucketStore> = Arc::new(SqliteBucketStore::open(&path).await.expect("reopen"));
    let mut bucket = store.get_bucket(LATEST_BUCKET).expect("bucket");
    assert!(bucket.get(b"dev1/sensor1").await.expect("get").is_some());
    bucket.close();
    let history = historian(store);
    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let latest = reader
        .get_properties(&["temperature".to_string(), "missing".to_string()])
        .await
        .expect("latest after reopen");
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].data, b"12".to_vec());
}

#[tokio::test]
async fn properties_event_updates_each_property() {
    let history = historian(Arc::new(MemBucketStore::new()));
    let writer = history.cap_add_any_thing("test");
    writer
        .add_event(event(
            "properties",
            r#"{"temp":21.5,"unit":"C"}"#,
            &minutes_ago(1),
        ))
        .await
        .expect("add");
    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let latest = reader.get_properties(&[]).await.expect("latest");
    let names: Vec<&str> = latest.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["temp", "unit"]);
    assert_eq!(latest[0].data, b"21.5".to_vec());
    assert_eq!(latest[1].data, b"C".to_vec());
}

#[tokio::test]
async fn published_events_and_actions_are_ingested() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let pubsub = PubSubService::new(PubSubConfig::default(), Arc::new(AllowAll));
    let history = historian(store.clone());
    history.start(&pubsub).expect("start");

    let device = pubsub.cap_device_pubsub("dev1");
    device.pub_event("sensor1", "temperature", "10").expect("publish");
    let service = pubsub.cap_service_pubsub("controller");
    service
        .pub_action("dev1", "sensor1", "reset", "")
        .expect("action");

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let mut stored = 0;
    for _ in 0..50 {
        stored = reader.info().await.expect("info").n_keys;
        if stored == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stored, 2);
    let latest = reader.get_properties(&[]).await.expect("latest");
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].name, "temperature");

    drop(device);
    drop(service);
    history.stop().await;
    assert_eq!(pubsub.core().subscription_count(), 0);
    assert_eq!(store.outstanding_handles(), 0);
    store.close().await.expect("close");
}

#[tokio::test]
async fn values_in_the_same_millisecond_are_all_kept() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let history = historian(store.clone());
    let writer = history.cap_add_any_thing("test");
    let created = minutes_ago(1);
    writer
        .add_events(vec![event("temp", "1", &created), event("temp", "2", &created)])
        .await
        .expect("add");
    writer
        .add_event(event("temp", "3", &created))
        .await
        .expect("add single");

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    assert_eq!(reader.info().await.expect("info").n_keys, 3);
    let mut cursor = reader.get_event_history("temp").await.expect("cursor");
    let (values, remaining) = cursor.next_n(10).await;
    cursor.release();
    assert!(!remaining);
    assert_eq!(
        values.iter().map(|v| v.data.clone()).collect::<Vec<_>>(),
        vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
    );
    assert!(values.iter().all(|v| v.created == created));
}

#[tokio::test]
async fn records_hold_the_raw_payload_and_read_back_as_envelopes() {
    let store: Arc<dyn BucketStore> = Arc::new(MemBucketStore::new());
    let history = historian(store.clone());
    let writer = history.cap_add_any_thing("test");
    let created = "2024-01-01T10:00:00.000Z";
    writer
        .add_event(event("temp", "21.5", created))
        .await
        .expect("add");

    let mut bucket = store.get_bucket("dev1/sensor1").expect("bucket");
    let mut raw = bucket.cursor().await.expect("raw cursor");
    let record = raw.first().await.expect("record");
    raw.release();
    bucket.close();
    assert_eq!(record.value, b"21.5".to_vec());
    let key = HistoryKey::decode(&record.key).expect("key");
    assert_eq!(key.name, "temp");
    assert_eq!(key.kind, RecordKind::Event);

    let reader = history.cap_read_history("user1", "dev1", "sensor1");
    let mut cursor = reader.get_event_history("").await.expect("cursor");
    let value = cursor.first().await.expect("value");
    cursor.release();
    assert_eq!(value, event("temp", "21.5", created));
    assert_eq!(store.outstanding_handles(), 0);
}
