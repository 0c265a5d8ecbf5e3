use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use protocol::{ChannelId, Direction, Message, SchemaError, SchemaRegistry};

/// A frame that decoded and matched its channel's contract for the send
/// direction. `frame` keeps the sender's exact text for relaying.
#[derive(Debug, Clone)]
pub struct Validated {
    pub message: Message,
    pub frame: String,
}

// Per-connection validation, bound to the channel resolved at admission
pub struct ValidationGate {
    schemas: Arc<dyn SchemaRegistry>,
    channel: Option<ChannelId>,
}

impl ValidationGate {
    pub fn new(schemas: Arc<dyn SchemaRegistry>, channel: Option<ChannelId>) -> Self {
        ValidationGate { schemas, channel }
    }

    pub fn validate(&self, raw: &[u8]) -> Result<Validated, SchemaError> {
        // a connection with no channel can't send anything
        let channel = self.channel.as_ref().ok_or(SchemaError::NoChannel)?;

        let frame = std::str::from_utf8(raw).map_err(|e| SchemaError::Decode(e.to_string()))?;
        let value: Value = serde_json::from_str(frame).map_err(|e| SchemaError::Decode(e.to_string()))?;

        self.schemas.validate(channel, Direction::Send, &value)?;

        let message = Message::from_value(value)?;
        if !message.is_broadcastable() {
            return Err(SchemaError::ServerOnly(message.kind()));
        }

        debug!("validated {} frame on channel {}", message.kind(), channel);
        Ok(Validated {
            message,
            frame: frame.to_owned(),
        })
    }
}
