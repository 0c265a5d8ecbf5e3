use std::fmt;
use std::sync::Arc;

use crate::error::DeliveryError;

// server type definitions

pub type ConnId = u64;

// shared handle to a connection's outbound side
pub type ChannelRef = Arc<dyn Channel>;

/// Outbound half of a participant's bidirectional connection.
///
/// Implementations must not block: `send` queues a frame, `close` queues a
/// close request. The transport owns the underlying resource.
pub trait Channel: Send + Sync {
    fn send(&self, frame: &str) -> Result<(), DeliveryError>;

    fn close(&self);
}

/// Name and pen color claimed at admission, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub color: String,
}

impl Identity {
    // both fields are required and non-empty, otherwise the handshake is refused
    pub fn new(username: impl Into<String>, color: impl Into<String>) -> Option<Self> {
        let (username, color) = (username.into(), color.into());
        if username.is_empty() || color.is_empty() {
            return None;
        }
        Some(Identity { username, color })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.username, self.color)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Pending,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted { count: usize },
    Rejected(crate::error::DuplicateIdentity),
}
