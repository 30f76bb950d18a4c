use domain::topic::ensure_segment;
use domain::{MessageType, ThingAddr, ThingTopic, thing_pattern, thing_topic};

#[test]
fn topic_round_trips_through_parse() {
    let topic = thing_topic("dev1", "sensor1", MessageType::Event, "temperature");
    assert_eq!(topic, "things/dev1/sensor1/event/temperature");

    let parsed = ThingTopic::parse(&topic).expect("parse");
    assert_eq!(parsed.publisher_id, "dev1");
    assert_eq!(parsed.msg_type, MessageType::Event);
    assert_eq!(parsed.to_string(), topic);
}

#[test]
fn td_topic_may_have_empty_name() {
    let parsed = ThingTopic::parse("things/dev1/sensor1/td/").expect("parse");
    assert_eq!(parsed.msg_type, MessageType::Td);
    assert_eq!(parsed.name, "");
}

#[test]
fn foreign_topics_are_rejected() {
    assert!(ThingTopic::parse("services/history/action/latest").is_none());
    assert!(ThingTopic::parse("things/dev1/sensor1/event").is_none());
    assert!(ThingTopic::parse("things/dev1/sensor1/state/x").is_none());
}

#[test]
fn pattern_fills_wildcards() {
    assert_eq!(thing_pattern("", "", MessageType::Td, ""), "things/+/+/td/+");
    let parsed = ThingTopic::parse(&thing_pattern("dev1", "", MessageType::Action, "")).expect("parse");
    assert!(parsed.has_wildcard());
}

#[test]
fn segments_reject_separators() {
    assert!(ensure_segment("thingID", "a/b").is_err());
    assert!(ensure_segment("thingID", "+").is_err());
    assert!(ensure_segment("thingID", "sensor1").is_ok());
}

#[test]
fn address_parses_first_separator() {
    let addr = ThingAddr::parse("dev1/sensor1").expect("addr");
    assert_eq!(addr.to_string(), "dev1/sensor1");
    assert!(ThingAddr::parse("properties").is_none());
}
