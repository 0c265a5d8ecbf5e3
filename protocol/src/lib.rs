//! Wire types shared by the hub server and its clients, plus the contract
//! that decides which frames a channel accepts.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

pub mod schema;

pub use schema::{ChannelId, Contract, Direction, SchemaError, SchemaRegistry};

// join acknowledgment always reports this status
pub const JOINED_STATUS: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub text: String,
    pub timestamp: String, // ISO8601, kept verbatim
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    #[serde(rename = "positionX")]
    pub position_x: f64,
    #[serde(rename = "positionY")]
    pub position_y: f64,
    pub color: String,
}

// Server -> single client only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub text: String,
    pub timestamp: String,
}

// Server -> newly admitted client only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinAck {
    pub num_connections: usize,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Chat(Chat),       // "chat"
    Drawing(Drawing), // "drawing"
    Error(Notice),    // "error"
    Joined(JoinAck),  // untagged
}

// tagged frames as they appear on the wire
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Tagged {
    Chat(Chat),
    Drawing(Drawing),
    Error(Notice),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedRef<'a> {
    Chat(&'a Chat),
    Drawing(&'a Drawing),
    Error(&'a Notice),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyFrame {
    Tagged(Tagged),
    Joined(JoinAck),
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Message::Chat(m) => TaggedRef::Chat(m).serialize(serializer),
            Message::Drawing(m) => TaggedRef::Drawing(m).serialize(serializer),
            Message::Error(m) => TaggedRef::Error(m).serialize(serializer),
            Message::Joined(ack) => ack.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match AnyFrame::deserialize(deserializer)? {
            AnyFrame::Tagged(Tagged::Chat(m)) => Message::Chat(m),
            AnyFrame::Tagged(Tagged::Drawing(m)) => Message::Drawing(m),
            AnyFrame::Tagged(Tagged::Error(m)) => Message::Error(m),
            AnyFrame::Joined(ack) => Message::Joined(ack),
        })
    }
}

impl Message {
    /// Error notice stamped with the current instant, e.g. `2024-01-01T00:00:00.000Z`.
    pub fn error(text: impl Into<String>) -> Self {
        Message::Error(Notice {
            text: text.into(),
            timestamp: now_iso8601(),
        })
    }

    pub fn joined(num_connections: usize) -> Self {
        Message::Joined(JoinAck {
            num_connections,
            status: JOINED_STATUS,
        })
    }

    // Only participant content is relayed; errors and acks target a single client
    pub fn is_broadcastable(&self) -> bool {
        matches!(self, Message::Chat(_) | Message::Drawing(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Chat(_) => "chat",
            Message::Drawing(_) => "drawing",
            Message::Error(_) => "error",
            Message::Joined(_) => "joined",
        }
    }

    pub fn from_json(frame: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(frame).map_err(|e| SchemaError::Decode(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, SchemaError> {
        serde_json::from_value(value).map_err(|e| SchemaError::Decode(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_encodes_with_type_tag() {
        let msg = Message::Chat(Chat {
            text: "hi".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "chat", "text": "hi", "timestamp": "2024-01-01T00:00:00Z"}));
    }

    #[test]
    fn drawing_uses_camel_case_positions() {
        let msg = Message::from_json(r#"{"type":"drawing","positionX":3,"positionY":4.5,"color":"red"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Drawing(Drawing { position_x: 3.0, position_y: 4.5, color: "red".into() })
        );
    }

    #[test]
    fn joined_has_no_type_tag() {
        let value = serde_json::to_value(Message::joined(2)).unwrap();
        assert_eq!(value, json!({"num_connections": 2, "status": 1}));
        assert_eq!(Message::from_value(value).unwrap(), Message::joined(2));
    }

    #[test]
    fn unknown_type_is_a_decode_failure() {
        let err = Message::from_json(r#"{"type":"shout","text":"x"}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Decode(_)));
    }

    #[test]
    fn error_notice_timestamp_is_rfc3339_utc() {
        let Message::Error(notice) = Message::error("boom") else {
            panic!("expected error notice");
        };
        assert_eq!(notice.text, "boom");
        assert!(notice.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&notice.timestamp).is_ok());
    }

    #[test]
    fn only_chat_and_drawing_are_broadcastable() {
        assert!(!Message::error("x").is_broadcastable());
        assert!(!Message::joined(1).is_broadcastable());
        assert!(Message::Chat(Chat { text: "a".into(), timestamp: now_iso8601() }).is_broadcastable());
    }
}
