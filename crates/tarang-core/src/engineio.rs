//! Engine.IO v4 / Socket.IO v5 packet codec.
//!
//! Only the text framing is supported. Binary attachments are rejected at
//! decode time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const ENGINE_IO_VERSION: u8 = 4;
pub const RECORD_SEPARATOR: char = '\u{1e}';
pub const DEFAULT_NAMESPACE: &str = "/";
pub const PROBE: &str = "probe";
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type '{0}'")]
    UnknownPacketType(char),
    #[error("binary packets are not supported")]
    Binary,
    #[error("invalid handshake: {0}")]
    Handshake(String),
    #[error("invalid packet data: {0}")]
    Data(String),
    #[error("event packet without a name")]
    MissingEventName,
    #[error("ack packet without an id")]
    MissingAckId,
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    pub fn allows_upgrade_to(&self, transport: &str) -> bool {
        self.upgrades.iter().any(|upgrade| upgrade == transport)
    }

    /// Silence longer than this means the server is gone.
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let body = chars.as_str();
        match kind {
            '0' => serde_json::from_str(body)
                .map(EnginePacket::Open)
                .map_err(|err| ProtocolError::Handshake(err.to_string())),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            'b' => Err(ProtocolError::Binary),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                let body = serde_json::to_string(handshake).unwrap_or_else(|_| "{}".to_string());
                format!("0{body}")
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(body) => format!("2{body}"),
            EnginePacket::Pong(body) => format!("3{body}"),
            EnginePacket::Message(body) => format!("4{body}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn socket(packet: &SocketPacket) -> Self {
        EnginePacket::Message(packet.encode())
    }
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<ProtocolError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Splits a polling payload into packets. Bad records are reported and
/// skipped so one malformed packet does not drop its neighbours.
pub fn decode_payload(raw: &str) -> DecodeReport<EnginePacket> {
    let mut report = DecodeReport::default();
    for record in raw.split(RECORD_SEPARATOR) {
        if record.is_empty() {
            continue;
        }
        match EnginePacket::decode(record) {
            Ok(packet) => report.frames.push(packet),
            Err(err) => report.errors.push(err),
        }
    }
    report
}

pub fn encode_payload(packets: &[EnginePacket]) -> String {
    let mut out = String::new();
    for (idx, packet) in packets.iter().enumerate() {
        if idx > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(&packet.encode());
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    pub fn connect_default() -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn event(name: impl Into<String>, data: Value) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            name: name.into(),
            args: vec![data],
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(ProtocolError::Binary);
        }
        if !matches!(kind, '0'..='4') {
            return Err(ProtocolError::UnknownPacketType(kind));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.chars().take_while(|ch| ch.is_ascii_digit()).count();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|err| ProtocolError::Data(err.to_string()))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|err| ProtocolError::Data(err.to_string()))?,
            )
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut items = match data {
                    Some(Value::Array(items)) => items,
                    _ => return Err(ProtocolError::MissingEventName),
                };
                if items.is_empty() {
                    return Err(ProtocolError::MissingEventName);
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(ProtocolError::MissingEventName),
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args: items,
                })
            }
            '3' => {
                let id = id.ok_or(ProtocolError::MissingAckId)?;
                let args = match data {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(SocketPacket::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            _ => Ok(SocketPacket::ConnectError { namespace, data }),
        }
    }

    pub fn encode(&self) -> String {
        let (kind, id, data) = match self {
            SocketPacket::Connect { data, .. } => ('0', None, data.clone()),
            SocketPacket::Disconnect { .. } => ('1', None, None),
            SocketPacket::Event { id, name, args, .. } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                ('2', *id, Some(Value::Array(items)))
            }
            SocketPacket::Ack { id, args, .. } => ('3', Some(*id), Some(Value::Array(args.clone()))),
            SocketPacket::ConnectError { data, .. } => ('4', None, data.clone()),
        };

        let mut out = String::new();
        out.push(kind);
        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// First event argument, which is where every simulation payload lives.
    pub fn first_arg(&self) -> Option<&Value> {
        match self {
            SocketPacket::Event { args, .. } | SocketPacket::Ack { args, .. } => args.first(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_flask_socketio_handshake() {
        let raw = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":5000,"maxPayload":1000000}"#;
        let packet = EnginePacket::decode(raw).expect("open packet");
        let EnginePacket::Open(handshake) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert!(handshake.allows_upgrade_to("websocket"));
        assert_eq!(handshake.heartbeat_deadline(), Duration::from_millis(30_000));
        assert_eq!(handshake.max_payload, Some(1_000_000));
    }

    #[test]
    fn handshake_defaults_missing_timers() {
        let packet = EnginePacket::decode(r#"0{"sid":"abc"}"#).expect("open packet");
        let EnginePacket::Open(handshake) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(handshake.ping_interval, DEFAULT_PING_INTERVAL_MS);
        assert!(handshake.upgrades.is_empty());
    }

    #[test]
    fn engine_packet_kinds() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(
            EnginePacket::decode("3probe").unwrap(),
            EnginePacket::Pong(PROBE.to_string())
        );
        assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
        assert_eq!(EnginePacket::decode(""), Err(ProtocolError::Empty));
        assert_eq!(EnginePacket::decode("bAQID"), Err(ProtocolError::Binary));
        assert_eq!(
            EnginePacket::decode("9"),
            Err(ProtocolError::UnknownPacketType('9'))
        );
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert_eq!(EnginePacket::Upgrade.encode(), "5");
    }

    #[test]
    fn polling_payload_splits_on_record_separator() {
        let raw = "2\u{1e}42[\"simulation_output\",{\"process_id\":0,\"output\":\"t=0.1\"}]\u{1e}x";
        let report = decode_payload(raw);
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.frames[0], EnginePacket::Ping(String::new()));
        assert_eq!(report.errors, vec![ProtocolError::UnknownPacketType('x')]);

        let encoded = encode_payload(&[
            EnginePacket::Pong(String::new()),
            EnginePacket::socket(&SocketPacket::connect_default()),
        ]);
        assert_eq!(encoded, "3\u{1e}40");
    }

    #[test]
    fn decodes_event_packets() {
        let packet = SocketPacket::decode(
            r#"2["simulation_error",{"process_id":4,"error":"solver diverged"}]"#,
        )
        .expect("event");
        match packet {
            SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            } => {
                assert_eq!(namespace, DEFAULT_NAMESPACE);
                assert_eq!(id, None);
                assert_eq!(name, "simulation_error");
                assert_eq!(args, vec![json!({"process_id": 4, "error": "solver diverged"})]);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn decodes_namespace_and_ack_id() {
        let packet = SocketPacket::decode(r#"2/admin,12["ping",1]"#).expect("event");
        assert_eq!(packet.namespace(), "/admin");
        assert!(matches!(packet, SocketPacket::Event { id: Some(12), ref name, .. } if name == "ping"));

        let connected = SocketPacket::decode(r#"0{"sid":"xyz"}"#).expect("connect");
        assert_eq!(
            connected,
            SocketPacket::Connect {
                namespace: DEFAULT_NAMESPACE.to_string(),
                data: Some(json!({"sid": "xyz"})),
            }
        );

        assert_eq!(SocketPacket::decode("3"), Err(ProtocolError::MissingAckId));
        assert_eq!(SocketPacket::decode("2{}"), Err(ProtocolError::MissingEventName));
        assert_eq!(SocketPacket::decode("51-[]"), Err(ProtocolError::Binary));
    }

    #[test]
    fn encodes_events_like_the_server() {
        let packet = SocketPacket::event("simulation_complete", json!({"process_id": 2}));
        assert_eq!(
            EnginePacket::socket(&packet).encode(),
            r#"42["simulation_complete",{"process_id":2}]"#
        );
        assert_eq!(SocketPacket::connect_default().encode(), "0");
        let scoped = SocketPacket::Disconnect {
            namespace: "/sim".to_string(),
        };
        assert_eq!(scoped.encode(), "1/sim,");
    }

    #[test]
    fn first_arg_reads_event_payloads_only() {
        let event = SocketPacket::decode(r#"21["simulation_output",{"output":"a"},"extra"]"#)
            .expect("event with ack id");
        assert_eq!(event.first_arg(), Some(&json!({"output": "a"})));
        assert_eq!(SocketPacket::event("bare", Value::Null).first_arg(), Some(&Value::Null));
        assert_eq!(SocketPacket::connect_default().first_arg(), None);
    }
}
