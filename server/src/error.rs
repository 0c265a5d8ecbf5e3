use protocol::SchemaError;
use thiserror::Error;

pub const INTERNAL_FAULT_TEXT: &str = "Internal Server Error";

/// What collided with an active participant: half of the identity, or the
/// connection id itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DuplicateIdentity {
    #[error("user with this name already exists")]
    Username,
    #[error("user with this color already exists")]
    Color,
    #[error("connection is already registered")]
    Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection {0} is no longer writable")]
    Closed(u64),
    #[error("outbound queue for connection {0} is full")]
    Full(u64),
}

// Failure taxonomy for a single connection; none of these are process-fatal
#[derive(Debug, Error)]
pub enum HubError {
    #[error("handshake rejected: {0}")]
    HandshakeRejected(&'static str),
    #[error("no channel in the contract serves path '{0}'")]
    UnresolvedEndpoint(String),
    #[error(transparent)]
    DuplicateIdentity(#[from] DuplicateIdentity),
    #[error(transparent)]
    SchemaViolation(#[from] SchemaError),
    #[error("internal fault: {0}")]
    InternalFault(String),
    #[error(transparent)]
    DeliveryFailure(#[from] DeliveryError),
}

impl HubError {
    // text carried by the Error frame sent back to the offending connection
    pub fn notice_text(&self) -> String {
        match self {
            HubError::InternalFault(_) => INTERNAL_FAULT_TEXT.to_owned(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::InternalFault(e.to_string())
    }
}
