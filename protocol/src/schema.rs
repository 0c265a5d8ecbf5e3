//! Channel contracts: which messages a channel carries in each direction and
//! what shape each of those messages must have.
//!
//! A contract names its channels and, per message, a JSON Schema for the
//! payload. Every schema is compiled once when the contract loads. The hub only
//! talks to this module through [`SchemaRegistry`], so a contract can be the
//! built-in one or a document loaded at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use jsonschema::Validator;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const EMBEDDED_CONTRACT: &str = include_str!("../contract.json");
const TYPE_FIELD: &str = "type";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        ChannelId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation direction, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,    // client -> server
    Receive, // server -> client
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Receive => f.write_str("receive"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed message: {0}")]
    Decode(String),
    #[error("connection has no channel to validate against")]
    NoChannel,
    #[error("unknown channel '{0}'")]
    UnknownChannel(ChannelId),
    #[error("message must be a JSON object")]
    NotAnObject,
    #[error("no {} message for {direction} on channel '{channel}'", .tag.as_deref().unwrap_or("untyped"))]
    UnknownMessage {
        channel: ChannelId,
        direction: Direction,
        tag: Option<String>,
    },
    #[error("field '{field}' must be {expected}")]
    WrongKind { field: String, expected: String },
    #[error("invalid {message} message at '{path}': {reason}")]
    Violation {
        message: String,
        path: String, // JSON pointer into the frame, "/" for the frame itself
        reason: String,
    },
    #[error("message kind '{0}' is never accepted from a client")]
    ServerOnly(&'static str),
    #[error("invalid contract: {0}")]
    Contract(String),
    #[error("unable to read contract {path}: {source}")]
    ContractIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Knows the protocol shape: maps connection paths to channels and checks
/// decoded frames against a channel's declared messages.
pub trait SchemaRegistry: Send + Sync {
    fn resolve_channel(&self, path: &str) -> Option<ChannelId>;

    fn validate(&self, channel: &ChannelId, direction: Direction, frame: &Value) -> Result<(), SchemaError>;
}

// contract document as written on disk
#[derive(Deserialize)]
struct ContractDoc {
    channels: BTreeMap<String, ChannelSpec>,
    messages: BTreeMap<String, MessageDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelSpec {
    address: String,
    #[serde(default)]
    send: Vec<String>,
    #[serde(default)]
    receive: Vec<String>,
}

#[derive(Deserialize)]
struct MessageDoc {
    #[serde(default)]
    tag: Option<String>,
    payload: Value, // JSON Schema
}

struct CompiledMessage {
    tag: Option<String>,
    validator: Validator,
}

pub struct Contract {
    channels: BTreeMap<String, ChannelSpec>,
    messages: BTreeMap<String, CompiledMessage>,
}

impl Contract {
    /// The contract compiled into the crate: a single `root` channel at `/`.
    pub fn embedded() -> Result<Self, SchemaError> {
        Self::from_json(EMBEDDED_CONTRACT)
    }

    pub fn from_json(doc: &str) -> Result<Self, SchemaError> {
        let doc: ContractDoc = serde_json::from_str(doc).map_err(|e| SchemaError::Contract(e.to_string()))?;
        check_references(&doc)?;

        let mut messages = BTreeMap::new();
        for (name, message) in doc.messages {
            let validator = jsonschema::options()
                .should_validate_formats(true)
                .build(&message.payload)
                .map_err(|e| SchemaError::Contract(format!("message '{}' schema: {}", name, e)))?;
            messages.insert(name, CompiledMessage { tag: message.tag, validator });
        }

        Ok(Contract {
            channels: doc.channels,
            messages,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let doc = std::fs::read_to_string(path).map_err(|source| SchemaError::ContractIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&doc)
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("channels", &self.channels)
            .field("messages", &self.messages.keys().collect::<Vec<_>>())
            .finish()
    }
}

// every message named by a channel operation must be declared
fn check_references(doc: &ContractDoc) -> Result<(), SchemaError> {
    for (id, channel) in &doc.channels {
        for name in channel.send.iter().chain(channel.receive.iter()) {
            if !doc.messages.contains_key(name) {
                return Err(SchemaError::Contract(format!(
                    "channel '{}' references undeclared message '{}'",
                    id, name
                )));
            }
        }
    }
    Ok(())
}

impl ChannelSpec {
    fn operation(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Send => &self.send,
            Direction::Receive => &self.receive,
        }
    }
}

impl SchemaRegistry for Contract {
    fn resolve_channel(&self, path: &str) -> Option<ChannelId> {
        let address = path.split('?').next().unwrap_or_default();

        self.channels
            .iter()
            .find(|(_, c)| c.address == address)
            .map(|(id, _)| ChannelId::new(id.as_str()))
    }

    fn validate(&self, channel: &ChannelId, direction: Direction, frame: &Value) -> Result<(), SchemaError> {
        let spec = self
            .channels
            .get(channel.as_str())
            .ok_or_else(|| SchemaError::UnknownChannel(channel.clone()))?;

        let object = frame.as_object().ok_or(SchemaError::NotAnObject)?;

        let tag = match object.get(TYPE_FIELD) {
            Some(Value::String(t)) => Some(t.as_str()),
            Some(_) => {
                return Err(SchemaError::WrongKind {
                    field: TYPE_FIELD.to_owned(),
                    expected: "a string".to_owned(),
                })
            }
            None => None,
        };

        let (name, message) = spec
            .operation(direction)
            .iter()
            .filter_map(|name| self.messages.get(name).map(|m| (name, m)))
            .find(|(_, m)| m.tag.as_deref() == tag)
            .ok_or_else(|| SchemaError::UnknownMessage {
                channel: channel.clone(),
                direction,
                tag: tag.map(str::to_owned),
            })?;

        debug!("validating {} frame for {} on channel {}", name, direction, channel);

        // report the first violation only
        match message.validator.iter_errors(frame).next() {
            None => Ok(()),
            Some(e) => {
                let path = e.instance_path.to_string();
                Err(SchemaError::Violation {
                    message: name.clone(),
                    path: if path.is_empty() { "/".to_owned() } else { path },
                    reason: e.to_string(),
                })
            }
        }
    }
}
