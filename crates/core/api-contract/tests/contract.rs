use api_contract::{
    DEFAULT_LIMIT, ErrorReply, ReadDirectoryRequest, ReadHistoryRequest, ReadLatestRequest,
    TOPIC_HISTORY_REPLY, TOPIC_LATEST_REQUEST, is_reply_topic, reply_topic,
};
use domain::HubError;

#[test]
fn latest_request_parses_without_names() {
    let request: ReadLatestRequest =
        serde_json::from_str(r#"{"publisherID":"dev1","thingID":"sensor1"}"#).expect("parse");
    assert_eq!(request.publisher_id, "dev1");
    assert!(request.names.is_empty());
}

#[test]
fn history_request_applies_defaults() {
    let request: ReadHistoryRequest =
        serde_json::from_str(r#"{"publisherID":"dev1","thingID":"sensor1","name":"humidity"}"#)
            .expect("parse");
    assert!(request.start_time.is_none());
    assert_eq!(request.duration, 24 * 3600);
    assert_eq!(request.limit, DEFAULT_LIMIT);
}

#[test]
fn directory_request_may_be_empty() {
    let request: ReadDirectoryRequest = serde_json::from_str("{}").expect("parse");
    assert!(request.publisher_id.is_none());
    assert_eq!(request.limit, DEFAULT_LIMIT);
}

#[test]
fn request_topics_map_to_reply_topics() {
    assert_eq!(
        reply_topic(TOPIC_LATEST_REQUEST),
        Some("services/history/event/latest")
    );
    assert!(reply_topic("things/dev1/sensor1/event/t").is_none());
    assert!(is_reply_topic(TOPIC_HISTORY_REPLY));
}

#[test]
fn error_reply_carries_kind() {
    let reply = ErrorReply::from(&HubError::not_permitted("devA may not publish for devB"));
    assert_eq!(reply.code, "NOT_PERMITTED");
    let json = serde_json::to_string(&reply).expect("json");
    assert!(json.contains("\"code\":\"NOT_PERMITTED\""));
}
