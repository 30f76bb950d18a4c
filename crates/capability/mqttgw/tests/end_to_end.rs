mod support;

use api_contract::{ReadDirectoryRequest, ReadHistoryRequest, ReadLatestRequest};
use domain::HubError;
use domain::time::now_epoch_ms;
use hub_mqttgw::HubMqttClient;
use std::time::Duration;
use support::{TestHub, eventually};

fn latest_request(publisher_id: &str, thing_id: &str) -> ReadLatestRequest {
    ReadLatestRequest {
        publisher_id: publisher_id.to_string(),
        thing_id: thing_id.to_string(),
        names: Vec::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn user_reads_latest_and_history_over_mqtt() {
    let hub = TestHub::start().await;
    let device = hub.client("dev1").await;
    let user = hub.client("alice").await;

    device
        .publish("things/dev1/sensor1/event/temperature", "21.5")
        .await
        .expect("publish raw value");
    device
        .publish(
            "things/dev1/sensor1/event/humidity",
            r#"{"publisherID":"spoofed","data":"40","created":"2024-01-01T00:00:00Z"}"#,
        )
        .await
        .expect("publish envelope");

    let reader = &user;
    let latest = eventually(|| async move {
        let reply = reader
            .read_latest(&latest_request("dev1", "sensor1"))
            .await
            .expect("latest reply");
        (reply.values.len() >= 2).then_some(reply)
    })
    .await;
    let temperature = latest
        .values
        .iter()
        .find(|value| value.name == "temperature")
        .expect("temperature value");
    assert_eq!(temperature.data, b"21.5".to_vec());
    assert_eq!(temperature.publisher_id, "dev1");
    let humidity = latest
        .values
        .iter()
        .find(|value| value.name == "humidity")
        .expect("humidity value");
    assert_eq!(humidity.publisher_id, "dev1");
    assert_eq!(humidity.created, "2024-01-01T00:00:00.000Z");

    let history = user
        .read_history(&ReadHistoryRequest {
            publisher_id: "dev1".to_string(),
            thing_id: "sensor1".to_string(),
            name: "temperature".to_string(),
            start_time: domain::time::millis_to_iso(now_epoch_ms() - 60_000),
            duration: 3600,
            limit: 10,
        })
        .await
        .expect("history reply");
    assert_eq!(history.values.len(), 1);
    assert_eq!(history.values[0].data, b"21.5".to_vec());
    assert!(!history.items_remaining);
    assert_eq!(history.duration, 3600);

    user.disconnect().await.expect("disconnect user");
    device.disconnect().await.expect("disconnect device");
    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn user_is_refused_things_it_cannot_view() {
    let hub = TestHub::start().await;
    let other = hub.client("devA").await;
    other
        .publish("things/devA/thing1/event/x", "1")
        .await
        .expect("publish");
    let user = hub.client("alice").await;

    let err = user
        .read_latest(&latest_request("devA", "thing1"))
        .await
        .expect_err("not a viewer");
    assert!(matches!(err, HubError::NotPermitted(_)));

    let err = user
        .read_history(&ReadHistoryRequest {
            publisher_id: String::new(),
            thing_id: "thing1".to_string(),
            name: String::new(),
            start_time: None,
            duration: 60,
            limit: 10,
        })
        .await
        .expect_err("missing publisher");
    assert!(matches!(err, HubError::InvalidValue(_)));

    user.disconnect().await.expect("disconnect");
    other.disconnect().await.expect("disconnect");
    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn directory_replies_only_with_viewable_tds() {
    let hub = TestHub::start().await;
    let dev1 = hub.client("dev1").await;
    let dev_a = hub.client("devA").await;
    dev1.publish("things/dev1/sensor1/td/thermometer", r#"{"title":"sensor 1"}"#)
        .await
        .expect("publish td");
    dev_a
        .publish("things/devA/thing1/td/switch", r#"{"title":"thing 1"}"#)
        .await
        .expect("publish td");

    let watcher = hub.client("watcher").await;
    let reader = &watcher;
    let all = eventually(|| async move {
        let reply = reader
            .read_directory(&ReadDirectoryRequest {
                publisher_id: None,
                limit: 10,
            })
            .await
            .expect("directory reply");
        (reply.tds.len() == 2).then_some(reply)
    })
    .await;
    assert!(!all.items_remaining);
    assert!(all.tds.iter().all(|td| td.name == "td"));

    let paged = watcher
        .read_directory(&ReadDirectoryRequest {
            publisher_id: None,
            limit: 1,
        })
        .await
        .expect("paged reply");
    assert_eq!(paged.tds.len(), 1);
    assert!(paged.items_remaining);

    let user = hub.client("alice").await;
    let visible = user
        .read_directory(&ReadDirectoryRequest::default())
        .await
        .expect("user directory reply");
    assert_eq!(visible.tds.len(), 1);
    assert_eq!(visible.tds[0].publisher_id, "dev1");
    assert_eq!(visible.tds[0].data, br#"{"title":"sensor 1"}"#.to_vec());

    for client in [dev1, dev_a, watcher, user] {
        client.disconnect().await.expect("disconnect");
    }
    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spoofed_device_publish_is_dropped_and_session_survives() {
    let hub = TestHub::start().await;
    let rejected_before = hub_telemetry::metrics().snapshot().rejected_not_permitted;
    let watcher = hub.client("watcher").await;
    let mut messages = watcher.messages();
    watcher.subscribe("things/+/+/event/+").await.expect("subscribe");
    let device = hub.client("devA").await;

    // 订阅生效后才开始断言
    let mut attempts = 0;
    loop {
        device
            .publish("things/devA/thing1/event/ping", "ping")
            .await
            .expect("publish ping");
        let received = tokio::time::timeout(Duration::from_millis(100), messages.recv()).await;
        if matches!(received, Ok(Ok(_))) {
            break;
        }
        attempts += 1;
        assert!(attempts < 30, "subscription never became active");
    }

    device
        .publish("things/devB/thing1/event/x", "forged")
        .await
        .expect("publish is sent");
    device
        .publish("things/devA/thing1/event/after", "still connected")
        .await
        .expect("publish after rejection");

    let delivered = tokio::time::timeout(Duration::from_secs(3), async {
        let mut seen = Vec::new();
        loop {
            let message = messages.recv().await.expect("message");
            let done = message.topic == "things/devA/thing1/event/after";
            seen.push(message.topic);
            if done {
                return seen;
            }
        }
    })
    .await
    .expect("message after rejection");
    assert!(delivered.iter().all(|topic| !topic.starts_with("things/devB/")));
    assert!(hub_telemetry::metrics().snapshot().rejected_not_permitted > rejected_before);

    watcher.disconnect().await.expect("disconnect");
    device.disconnect().await.expect("disconnect");
    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bad_password_is_refused() {
    let hub = TestHub::start().await;
    let mut options = hub.options("alice");
    options.password = "wrong".to_string();
    let result = HubMqttClient::connect(options).await;
    assert!(result.is_err());
    hub.shutdown().await;
}
