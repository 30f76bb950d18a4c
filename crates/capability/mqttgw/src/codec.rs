//! MQTT 3.1.1 报文编解码。
//!
//! 固定报头为类型半字节 + 标志半字节，其后是 1~4 字节的剩余长度；
//! 字符串与二进制字段均以 2 字节大端长度为前缀。

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// 剩余长度字段可表示的最大值。
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const LEGACY_PROTOCOL_NAME: &str = "MQIsdp";
const LEGACY_PROTOCOL_LEVEL: u8 = 3;

/// CONNACK 返回码。
pub mod connack {
    pub const ACCEPTED: u8 = 0;
    pub const UNACCEPTABLE_PROTOCOL: u8 = 1;
    pub const IDENTIFIER_REJECTED: u8 = 2;
    pub const BAD_CREDENTIALS: u8 = 4;
    pub const NOT_AUTHORIZED: u8 = 5;
}

/// SUBACK 失败返回码。
pub const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("packet of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("unsupported protocol {0} level {1}")]
    UnsupportedProtocol(String, u8),
    #[error("unsupported qos {0}")]
    UnsupportedQos(u8),
}

fn malformed(message: impl Into<String>) -> CodecError {
    CodecError::Malformed(message.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

impl Publish {
    /// 服务端下发使用 QoS 0。
    pub fn at_most_once(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos: 0,
            retain: false,
            dup: false,
            packet_id: None,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck { session_present: bool, code: u8 },
    Publish(Publish),
    PubAck { packet_id: u16 },
    Subscribe { packet_id: u16, filters: Vec<(String, u8)> },
    SubAck { packet_id: u16, codes: Vec<u8> },
    Unsubscribe { packet_id: u16, filters: Vec<String> },
    UnsubAck { packet_id: u16 },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck { .. } => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck { .. } => "PUBACK",
            Packet::Subscribe { .. } => "SUBSCRIBE",
            Packet::SubAck { .. } => "SUBACK",
            Packet::Unsubscribe { .. } => "UNSUBSCRIBE",
            Packet::UnsubAck { .. } => "UNSUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}

/// 从缓冲区解出一个完整报文；数据不足时返回 `Ok(None)` 且不消费缓冲区。
pub fn decode(buf: &mut BytesMut, max_packet_bytes: usize) -> Result<Option<Packet>, CodecError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let Some((remaining, length_bytes)) = peek_remaining_length(&buf[1..])? else {
        return Ok(None);
    };
    let total = 1 + length_bytes + remaining;
    if total > max_packet_bytes {
        return Err(CodecError::TooLarge(total));
    }
    if buf.len() < total {
        return Ok(None);
    }
    let mut frame = buf.split_to(total).freeze();
    let header = frame.get_u8();
    frame.advance(length_bytes);
    decode_body(header, frame).map(Some)
}

fn peek_remaining_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (index, byte) in bytes.iter().take(4).enumerate() {
        value += (*byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        multiplier *= 128;
    }
    if bytes.len() >= 4 {
        return Err(malformed("remaining length exceeds 4 bytes"));
    }
    Ok(None)
}

fn decode_body(header: u8, mut body: Bytes) -> Result<Packet, CodecError> {
    let flags = header & 0x0F;
    let packet = match header >> 4 {
        1 => Packet::Connect(decode_connect(&mut body)?),
        2 => {
            let ack_flags = read_u8(&mut body)?;
            let code = read_u8(&mut body)?;
            Packet::ConnAck {
                session_present: ack_flags & 0x01 != 0,
                code,
            }
        }
        3 => Packet::Publish(decode_publish(flags, &mut body)?),
        4 => Packet::PubAck {
            packet_id: read_u16(&mut body)?,
        },
        8 => {
            expect_flags(flags, 0x02, "SUBSCRIBE")?;
            let packet_id = read_u16(&mut body)?;
            let mut filters = Vec::new();
            while body.has_remaining() {
                let filter = read_string(&mut body)?;
                let qos = read_u8(&mut body)? & 0x03;
                filters.push((filter, qos));
            }
            if filters.is_empty() {
                return Err(malformed("SUBSCRIBE without filters"));
            }
            Packet::Subscribe { packet_id, filters }
        }
        9 => {
            let packet_id = read_u16(&mut body)?;
            Packet::SubAck {
                packet_id,
                codes: body.to_vec(),
            }
        }
        10 => {
            expect_flags(flags, 0x02, "UNSUBSCRIBE")?;
            let packet_id = read_u16(&mut body)?;
            let mut filters = Vec::new();
            while body.has_remaining() {
                filters.push(read_string(&mut body)?);
            }
            if filters.is_empty() {
                return Err(malformed("UNSUBSCRIBE without filters"));
            }
            Packet::Unsubscribe { packet_id, filters }
        }
        11 => Packet::UnsubAck {
            packet_id: read_u16(&mut body)?,
        },
        12 => Packet::PingReq,
        13 => Packet::PingResp,
        14 => Packet::Disconnect,
        other => return Err(malformed(format!("unsupported packet type {other}"))),
    };
    Ok(packet)
}

fn expect_flags(flags: u8, expected: u8, name: &str) -> Result<(), CodecError> {
    if flags != expected {
        return Err(malformed(format!("{name} flags {flags:#x}")));
    }
    Ok(())
}

fn decode_connect(body: &mut Bytes) -> Result<Connect, CodecError> {
    let protocol = read_string(body)?;
    let level = read_u8(body)?;
    let supported = (protocol == PROTOCOL_NAME && level == PROTOCOL_LEVEL)
        || (protocol == LEGACY_PROTOCOL_NAME && level == LEGACY_PROTOCOL_LEVEL);
    if !supported {
        return Err(CodecError::UnsupportedProtocol(protocol, level));
    }
    let flags = read_u8(body)?;
    if flags & 0x01 != 0 {
        return Err(malformed("reserved CONNECT flag set"));
    }
    let keep_alive = read_u16(body)?;
    let client_id = read_string(body)?;
    if flags & 0x04 != 0 {
        // 遗嘱消息不投递，仅跳过
        read_string(body)?;
        read_binary(body)?;
    }
    let username = if flags & 0x80 != 0 {
        Some(read_string(body)?)
    } else {
        None
    };
    let password = if flags & 0x40 != 0 {
        Some(read_binary(body)?)
    } else {
        None
    };
    Ok(Connect {
        client_id,
        keep_alive,
        clean_session: flags & 0x02 != 0,
        username,
        password,
    })
}

fn decode_publish(flags: u8, body: &mut Bytes) -> Result<Publish, CodecError> {
    let qos = (flags >> 1) & 0x03;
    if qos > 1 {
        return Err(CodecError::UnsupportedQos(qos));
    }
    let topic = read_string(body)?;
    let packet_id = if qos > 0 { Some(read_u16(body)?) } else { None };
    Ok(Publish {
        topic,
        qos,
        retain: flags & 0x01 != 0,
        dup: flags & 0x08 != 0,
        packet_id,
        payload: body.split_to(body.remaining()),
    })
}

fn read_u8(body: &mut Bytes) -> Result<u8, CodecError> {
    if body.remaining() < 1 {
        return Err(malformed("truncated packet"));
    }
    Ok(body.get_u8())
}

fn read_u16(body: &mut Bytes) -> Result<u16, CodecError> {
    if body.remaining() < 2 {
        return Err(malformed("truncated packet"));
    }
    Ok(body.get_u16())
}

fn read_binary(body: &mut Bytes) -> Result<Vec<u8>, CodecError> {
    let len = read_u16(body)? as usize;
    if body.remaining() < len {
        return Err(malformed("truncated field"));
    }
    Ok(body.split_to(len).to_vec())
}

fn read_string(body: &mut Bytes) -> Result<String, CodecError> {
    String::from_utf8(read_binary(body)?).map_err(|_| malformed("invalid utf-8 string"))
}

/// 编码报文并追加到缓冲区。
pub fn encode(packet: &Packet, out: &mut BytesMut) -> Result<(), CodecError> {
    let mut body = BytesMut::new();
    let header = match packet {
        Packet::Connect(connect) => {
            write_string(&mut body, PROTOCOL_NAME)?;
            body.put_u8(PROTOCOL_LEVEL);
            let mut flags = 0u8;
            if connect.clean_session {
                flags |= 0x02;
            }
            if connect.username.is_some() {
                flags |= 0x80;
            }
            if connect.password.is_some() {
                flags |= 0x40;
            }
            body.put_u8(flags);
            body.put_u16(connect.keep_alive);
            write_string(&mut body, &connect.client_id)?;
            if let Some(username) = &connect.username {
                write_string(&mut body, username)?;
            }
            if let Some(password) = &connect.password {
                write_binary(&mut body, password)?;
            }
            0x10
        }
        Packet::ConnAck {
            session_present,
            code,
        } => {
            body.put_u8(u8::from(*session_present));
            body.put_u8(*code);
            0x20
        }
        Packet::Publish(publish) => {
            if publish.qos > 1 {
                return Err(CodecError::UnsupportedQos(publish.qos));
            }
            write_string(&mut body, &publish.topic)?;
            if publish.qos > 0 {
                let packet_id = publish
                    .packet_id
                    .ok_or_else(|| malformed("QoS 1 PUBLISH without packet id"))?;
                body.put_u16(packet_id);
            }
            body.put_slice(&publish.payload);
            0x30 | (u8::from(publish.dup) << 3) | (publish.qos << 1) | u8::from(publish.retain)
        }
        Packet::PubAck { packet_id } => {
            body.put_u16(*packet_id);
            0x40
        }
        Packet::Subscribe { packet_id, filters } => {
            body.put_u16(*packet_id);
            for (filter, qos) in filters {
                write_string(&mut body, filter)?;
                body.put_u8(*qos);
            }
            0x82
        }
        Packet::SubAck { packet_id, codes } => {
            body.put_u16(*packet_id);
            body.put_slice(codes);
            0x90
        }
        Packet::Unsubscribe { packet_id, filters } => {
            body.put_u16(*packet_id);
            for filter in filters {
                write_string(&mut body, filter)?;
            }
            0xA2
        }
        Packet::UnsubAck { packet_id } => {
            body.put_u16(*packet_id);
            0xB0
        }
        Packet::PingReq => 0xC0,
        Packet::PingResp => 0xD0,
        Packet::Disconnect => 0xE0,
    };
    if body.len() > MAX_REMAINING_LENGTH {
        return Err(CodecError::TooLarge(body.len()));
    }
    out.reserve(body.len() + 5);
    out.put_u8(header);
    write_remaining_length(out, body.len());
    out.extend_from_slice(&body);
    Ok(())
}

fn write_remaining_length(out: &mut BytesMut, mut value: usize) {
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

fn write_binary(out: &mut BytesMut, value: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| malformed("field longer than 65535 bytes"))?;
    out.put_u16(len);
    out.put_slice(value);
    Ok(())
}

fn write_string(out: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    write_binary(out, value.as_bytes())
}
