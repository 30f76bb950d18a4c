mod support;

use api_contract::{ErrorReply, TOPIC_HISTORY_REPLY, TOPIC_HISTORY_REQUEST, TOPIC_LATEST_REPLY, TOPIC_LATEST_REQUEST};
use async_trait::async_trait;
use domain::{HubError, MessageType, ThingTopic, ThingValue};
use hub_auth::Credentials;
use hub_mqttgw::{MqttSession, SessionWriter, value_from_payload};
use std::sync::Arc;
use std::time::Duration;
use support::{TestHub, password_of};
use tokio::sync::mpsc;

struct RecordingWriter {
    sent: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

#[async_trait]
impl SessionWriter for RecordingWriter {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), HubError> {
        self.sent
            .send((topic.to_string(), payload))
            .map_err(|_| HubError::Transport("closed".to_string()))
    }
}

async fn connect(
    hub: &TestHub,
    login: &str,
) -> (MqttSession, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
    let (sent, received) = mpsc::unbounded_channel();
    let session = hub
        .gateway
        .on_connect(
            &Credentials::Password {
                login_id: login.to_string(),
                password: password_of(login),
            },
            Arc::new(RecordingWriter { sent }),
        )
        .await
        .expect("connect");
    (session, received)
}

async fn next_sent(received: &mut mpsc::UnboundedReceiver<(String, Vec<u8>)>) -> (String, Vec<u8>) {
    tokio::time::timeout(Duration::from_secs(2), received.recv())
        .await
        .expect("reply in time")
        .expect("writer open")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_errors_reply_on_the_reply_topic() {
    let hub = TestHub::start().await;
    let (session, mut sent) = connect(&hub, "alice").await;

    session
        .on_publish(
            TOPIC_LATEST_REQUEST,
            br#"{"publisherID":"devA","thingID":"thing1"}"#,
        )
        .await
        .expect("reply written");
    let (topic, payload) = next_sent(&mut sent).await;
    assert_eq!(topic, TOPIC_LATEST_REPLY);
    let reply: ErrorReply = serde_json::from_slice(&payload).expect("error reply");
    assert_eq!(reply.code, "NOT_PERMITTED");

    session
        .on_publish(TOPIC_HISTORY_REQUEST, b"not json")
        .await
        .expect("reply written");
    let (topic, payload) = next_sent(&mut sent).await;
    assert_eq!(topic, TOPIC_HISTORY_REPLY);
    let reply: ErrorReply = serde_json::from_slice(&payload).expect("error reply");
    assert_eq!(reply.code, "INVALID_VALUE");

    session.on_disconnect();
    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscriptions_republish_envelopes_to_the_session() {
    let hub = TestHub::start().await;
    let (session, mut sent) = connect(&hub, "alice").await;
    session
        .on_subscribe("things/dev1/sensor1/event/+")
        .await
        .expect("subscribe");
    let err = session
        .on_subscribe("things/dev1/sensor1/action/+")
        .await
        .expect_err("users cannot subscribe to actions");
    assert!(matches!(err, HubError::NotPermitted(_)));
    let err = session
        .on_subscribe("things/devA/thing1/event/+")
        .await
        .expect_err("not a viewer");
    assert!(matches!(err, HubError::NotPermitted(_)));

    let device = hub.pubsub.cap_device_pubsub("dev1");
    device
        .pub_event("sensor1", "temperature", "22")
        .expect("device publish");
    let (topic, payload) = next_sent(&mut sent).await;
    assert_eq!(topic, "things/dev1/sensor1/event/temperature");
    let value = ThingValue::decode(&payload).expect("envelope");
    assert_eq!(value.data, b"22".to_vec());

    let err = session
        .on_publish("things/dev1/sensor1/event/temperature", b"1")
        .await
        .expect_err("users only publish actions");
    assert!(matches!(err, HubError::NotPermitted(_)));

    assert!(session.on_unsubscribe("things/dev1/sensor1/event/+"));
    assert!(!session.on_unsubscribe("things/dev1/sensor1/event/+"));
    session.on_disconnect();
    session.on_disconnect();
    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_password_is_rejected_at_connect() {
    let hub = TestHub::start().await;
    let (sent, _received) = mpsc::unbounded_channel();
    let err = hub
        .gateway
        .on_connect(
            &Credentials::Password {
                login_id: "alice".to_string(),
                password: "nope".to_string(),
            },
            Arc::new(RecordingWriter { sent }),
        )
        .await
        .err()
        .expect("rejected");
    assert!(matches!(err, HubError::NotPermitted(_)));
    hub.shutdown().await;
}

#[test]
fn topic_overrides_envelope_address() {
    let topic = ThingTopic::parse("things/dev1/sensor1/event/temperature").expect("topic");
    assert_eq!(topic.msg_type, MessageType::Event);

    let envelope = br#"{"publisherID":"other","thingID":"x","name":"y","data":"20","created":"2024-05-01T10:00:00Z"}"#;
    let value = value_from_payload(&topic, envelope);
    assert_eq!(value.publisher_id, "dev1");
    assert_eq!(value.thing_id, "sensor1");
    assert_eq!(value.name, "temperature");
    assert_eq!(value.data, b"20".to_vec());
    assert_eq!(value.created, "2024-05-01T10:00:00Z");

    let raw = value_from_payload(&topic, br#"{"celsius":20}"#);
    assert_eq!(raw.data, br#"{"celsius":20}"#.to_vec());
    assert!(!raw.created.is_empty());

    let td = br#"{"id":"sensor1","title":"Temp","data":"schema"}"#;
    assert_eq!(value_from_payload(&topic, td).data, td.to_vec());
    let body = br#"{"name":"reading","data":"20"}"#;
    assert_eq!(value_from_payload(&topic, body).data, body.to_vec());
    let nested = br#"{"thingID":"x","data":{"celsius":20}}"#;
    assert_eq!(value_from_payload(&topic, nested).data, nested.to_vec());
}
