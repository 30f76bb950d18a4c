use bytes::BytesMut;
use hub_mqttgw::codec::{CodecError, Connect, Packet, Publish, decode, encode};

const MAX: usize = 1024 * 1024;

fn encoded(packet: &Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    encode(packet, &mut buf).expect("encode");
    buf
}

#[test]
fn connect_with_credentials_is_parsed() {
    let connect = Packet::Connect(Connect {
        client_id: "dev1".to_string(),
        keep_alive: 30,
        clean_session: true,
        username: Some("dev1".to_string()),
        password: Some(b"secret".to_vec()),
    });
    let mut buf = encoded(&connect);
    assert_eq!(buf[0], 0x10);
    assert_eq!(decode(&mut buf, MAX).expect("decode"), Some(connect));
    assert!(buf.is_empty());
}

#[test]
fn partial_frames_wait_for_more_bytes() {
    let publish = Packet::Publish(Publish::at_most_once("things/a/b/event/c", vec![7u8; 300]));
    let full = encoded(&publish);
    // 300 字节负载需要两字节剩余长度
    assert_eq!(full[1] & 0x80, 0x80);

    let mut partial = BytesMut::from(&full[..1]);
    assert_eq!(decode(&mut partial, MAX).expect("header only"), None);
    let mut partial = BytesMut::from(&full[..full.len() - 1]);
    assert_eq!(decode(&mut partial, MAX).expect("body short"), None);
    assert_eq!(partial.len(), full.len() - 1);

    let mut two = full.clone();
    two.extend_from_slice(&encoded(&Packet::PingReq));
    assert_eq!(decode(&mut two, MAX).expect("first"), Some(publish));
    assert_eq!(decode(&mut two, MAX).expect("second"), Some(Packet::PingReq));
    assert_eq!(decode(&mut two, MAX).expect("drained"), None);
}

#[test]
fn oversized_and_malformed_packets_are_rejected() {
    let mut big = encoded(&Packet::Publish(Publish::at_most_once("t", vec![0u8; 2048])));
    assert!(matches!(decode(&mut big, 1024), Err(CodecError::TooLarge(_))));

    let mut qos2 = BytesMut::from(&[0x34u8, 0x05, 0x00, 0x01, b't', 0x00, 0x01][..]);
    assert_eq!(decode(&mut qos2, MAX), Err(CodecError::UnsupportedQos(2)));

    let mut bad_subscribe = BytesMut::from(&[0x80u8, 0x02, 0x00, 0x01][..]);
    assert!(matches!(
        decode(&mut bad_subscribe, MAX),
        Err(CodecError::Malformed(_))
    ));

    let mut endless = BytesMut::from(&[0x30u8, 0xFF, 0xFF, 0xFF, 0xFF, 0x01][..]);
    assert!(matches!(decode(&mut endless, MAX), Err(CodecError::Malformed(_))));
}

#[test]
fn subscribe_and_acks_decode() {
    let subscribe = Packet::Subscribe {
        packet_id: 9,
        filters: vec![("things/+/+/event/+".to_string(), 1)],
    };
    let mut buf = encoded(&subscribe);
    assert_eq!(buf[0], 0x82);
    assert_eq!(decode(&mut buf, MAX).expect("decode"), Some(subscribe));

    let qos1 = Packet::Publish(Publish {
        topic: "services/history/action/latest".to_string(),
        qos: 1,
        retain: false,
        dup: false,
        packet_id: Some(3),
        payload: bytes::Bytes::from_static(b"{}"),
    });
    let mut buf = encoded(&qos1);
    assert_eq!(buf[0], 0x32);
    assert_eq!(decode(&mut buf, MAX).expect("decode"), Some(qos1));
}
