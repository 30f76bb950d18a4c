use async_trait::async_trait;
use domain::{HubError, MessageType, ThingAddr, ThingValue};
use hub_auth::{AllowAll, ThingAuthorizer};
use hub_pubsub::{PubSubConfig, PubSubService, channel_handler};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// 只允许 alice 查看 dev1/sensor1，只允许 bob 操作它。
struct FixedAcl;

#[async_trait]
impl ThingAuthorizer for FixedAcl {
    async fn can_view(&self, client_id: &str, addr: &ThingAddr) -> bool {
        client_id == "alice" && addr == &ThingAddr::new("dev1", "sensor1")
    }

    async fn can_operate(&self, client_id: &str, addr: &ThingAddr) -> bool {
        client_id == "bob" && addr == &ThingAddr::new("dev1", "sensor1")
    }
}

fn service_with(authorizer: Arc<dyn ThingAuthorizer>) -> PubSubService {
    PubSubService::new(PubSubConfig::default(), authorizer)
}

async fn recv(rx: &mut UnboundedReceiver<ThingValue>) -> ThingValue {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("value in time")
        .expect("channel open")
}

async fn assert_silent(rx: &mut UnboundedReceiver<ThingValue>) {
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
}

#[tokio::test]
async fn device_events_reach_service_subscribers() {
    let pubsub = service_with(Arc::new(AllowAll));
    let device = pubsub.cap_device_pubsub("dev1");
    let historian = pubsub.cap_service_pubsub("historian");
    let (handler, mut rx) = channel_handler();
    historian.sub_events(handler).expect("subscribe");

    device.pub_event("sensor1", "temp", "21.5").expect("publish");
    let got = recv(&mut rx).await;
    assert_eq!(got.publisher_id, "dev1");
    assert_eq!(got.thing_id, "sensor1");
    assert_eq!(got.name, "temp");
    assert_eq!(got.data, b"21.5".to_vec());
}

#[tokio::test]
async fn device_cannot_publish_for_another_publisher() {
    let pubsub = service_with(Arc::new(AllowAll));
    let device = pubsub.cap_device_pubsub("devA");
    let observer = pubsub.cap_service_pubsub("observer");
    let (handler, mut rx) = channel_handler();
    observer.sub_events(handler).expect("subscribe");

    let forged = ThingValue::new("devB", "sensor1", "temp", "1");
    let err = device
        .publish(MessageType::Event, "temp", forged)
        .expect_err("forged publisher");
    assert!(matches!(err, HubError::NotPermitted(_)));

    let err = device
        .publish(MessageType::Action, "switch", ThingValue::new("devA", "s", "switch", "on"))
        .expect_err("device action");
    assert!(matches!(err, HubError::NotPermitted(_)));
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn identifiers_with_separators_are_invalid() {
    let pubsub = service_with(Arc::new(AllowAll));
    let device = pubsub.cap_device_pubsub("dev1");
    let (handler, _rx) = channel_handler();

    assert!(matches!(
        device.pub_event("a/b", "temp", "1"),
        Err(HubError::InvalidValue(_))
    ));
    assert!(matches!(
        device.pub_event("sensor1", "te+mp", "1"),
        Err(HubError::InvalidValue(_))
    ));
    assert!(matches!(
        device.pub_event("", "temp", "1"),
        Err(HubError::InvalidValue(_))
    ));
    assert!(matches!(
        device.sub_action("x/y", "", handler),
        Err(HubError::InvalidValue(_))
    ));
}

#[tokio::test]
async fn device_receives_actions_but_not_properties_action() {
    let pubsub = service_with(Arc::new(AllowAll));
    let device = pubsub.cap_device_pubsub("dev1");
    let controller = pubsub.cap_service_pubsub("controller");
    let (handler, mut rx) = channel_handler();
    device.sub_action("", "", handler).expect("sub action");

    controller
        .pub_action("dev1", "switch1", "properties", "{}")
        .expect("properties action");
    controller
        .pub_action("dev1", "switch1", "toggle", "on")
        .expect("action");
    controller
        .pub_action("dev2", "switch1", "toggle", "on")
        .expect("other device action");

    let got = recv(&mut rx).await;
    assert_eq!(got.name, "toggle");
    assert_eq!(got.publisher_id, "dev1");
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn user_event_subscription_is_acl_filtered() {
    let pubsub = service_with(Arc::new(FixedAcl));
    let device = pubsub.cap_device_pubsub("dev1");
    let alice = pubsub.cap_user_pubsub("alice");
    let (handler, mut rx) = channel_handler();
    alice
        .sub_event("", "", "temp", handler)
        .await
        .expect("wildcard subscribe");

    device.pub_event("sensor2", "temp", "hidden").expect("publish");
    device.pub_event("sensor1", "temp", "visible").expect("publish");

    let got = recv(&mut rx).await;
    assert_eq!(got.data, b"visible".to_vec());
    assert_silent(&mut rx).await;

    let (handler, _rx) = channel_handler();
    let err = alice
        .sub_event("dev1", "sensor2", "", handler.clone())
        .await
        .expect_err("not a viewer");
    assert!(matches!(err, HubError::NotPermitted(_)));

    let err = alice
        .sub_event("dev1", "", "", handler)
        .await
        .expect_err("no thing and no name");
    assert!(matches!(err, HubError::InvalidValue(_)));
}

#[tokio::test]
async fn user_actions_require_operator() {
    let pubsub = service_with(Arc::new(FixedAcl));
    let device = pubsub.cap_device_pubsub("dev1");
    let (handler, mut rx) = channel_handler();
    device.sub_action("sensor1", "", handler).expect("sub action");

    let alice = pubsub.cap_user_pubsub("alice");
    let err = alice
        .pub_action("dev1", "sensor1", "reset", "")
        .await
        .expect_err("viewer only");
    assert!(matches!(err, HubError::NotPermitted(_)));

    let bob = pubsub.cap_user_pubsub("bob");
    bob.pub_action("dev1", "sensor1", "reset", "now")
        .await
        .expect("operator");
    let got = recv(&mut rx).await;
    assert_eq!(got.name, "reset");

    let err = bob
        .publish(MessageType::Event, "temp", ThingValue::new("dev1", "sensor1", "temp", "1"))
        .await
        .expect_err("users cannot publish events");
    assert!(matches!(err, HubError::NotPermitted(_)));
}

#[tokio::test]
async fn tds_and_properties_are_published_with_reserved_names() {
    let pubsub = service_with(Arc::new(AllowAll));
    let device = pubsub.cap_device_pubsub("dev1");
    let directory = pubsub.cap_service_pubsub("directory");
    let (td_handler, mut tds) = channel_handler();
    directory.sub_tds("", "", td_handler).expect("sub tds");
    let (ev_handler, mut events) = channel_handler();
    directory
        .sub_event("dev1", "sensor1", "properties", ev_handler)
        .expect("sub properties");

    device
        .pub_td_typed("sensor1", "thermometer", "{\"id\":\"sensor1\"}")
        .expect("td");
    let td = recv(&mut tds).await;
    assert_eq!(td.name, "td");
    assert_eq!(td.data, b"{\"id\":\"sensor1\"}".to_vec());

    let mut props = BTreeMap::new();
    props.insert("temp".to_string(), serde_json::json!(21.5));
    props.insert("unit".to_string(), serde_json::json!("C"));
    device.pub_properties("sensor1", &props).expect("properties");
    let got = recv(&mut events).await;
    assert_eq!(got.name, "properties");
    let parsed: BTreeMap<String, serde_json::Value> =
        serde_json::from_slice(&got.data).expect("json object");
    assert_eq!(parsed, props);
}

#[tokio::test]
async fn releasing_capability_releases_its_subscriptions() {
    let pubsub = service_with(Arc::new(AllowAll));
    let core = pubsub.core();
    let service = pubsub.cap_service_pubsub("svc");
    let (handler, _rx) = channel_handler();

    let first = service.sub_events(handler.clone()).expect("sub");
    service.sub_tds("", "", handler.clone()).expect("sub");
    assert_eq!(service.subscription_count(), 2);
    assert_eq!(core.subscription_count(), 2);

    first.release();
    first.release();
    assert_eq!(service.subscription_count(), 1);

    service.release();
    assert_eq!(core.subscription_count(), 0);
    assert!(matches!(
        service.sub_events(handler.clone()),
        Err(HubError::NotPermitted(_))
    ));

    let device = pubsub.cap_device_pubsub("dev1");
    device.sub_action("", "", handler).expect("sub");
    assert_eq!(core.subscription_count(), 1);
    drop(device);
    assert_eq!(core.subscription_count(), 0);
}

#[tokio::test]
async fn publish_fills_missing_created() {
    let pubsub = service_with(Arc::new(AllowAll));
    let device = pubsub.cap_device_pubsub("dev1");
    let observer = pubsub.cap_service_pubsub("observer");
    let (handler, mut rx) = channel_handler();
    observer.sub_events(handler).expect("subscribe");

    let mut value = ThingValue::new("dev1", "sensor1", "temp", "1");
    value.created.clear();
    device
        .publish(MessageType::Event, "temp", value)
        .expect("publish");
    let got = recv(&mut rx).await;
    assert!(!got.created.is_empty());
    assert!(got.created_millis().is_some());

    let stamped = ThingValue::new("dev1", "sensor1", "temp", "2").with_created("2024-01-01T10:00:00.000Z");
    device
        .publish(MessageType::Event, "temp", stamped)
        .expect("publish");
    assert_eq!(recv(&mut rx).await.created, "2024-01-01T10:00:00.000Z");
}
