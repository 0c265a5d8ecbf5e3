use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::registry::ConnectionRegistry;
use crate::server_types::{ChannelRef, ConnId};

// handles msg delivery back to clients
#[derive(Clone)]
pub struct Delivery {
    registry: ConnectionRegistry,
}

impl Delivery {
    pub fn new(clients: &ConnectionRegistry) -> Self {
        Delivery {
            registry: clients.clone(),
        }
    }

    // single send to one client, used for acks and error notices
    pub fn send(&self, channel: &ChannelRef, frame: &str) -> Result<(), DeliveryError> {
        channel.send(frame)
    }

    /// Fan `frame` out to every active connection except `except`.
    /// A target that can't be written to is logged and skipped.
    /// Returns how many targets accepted the frame.
    pub async fn broadcast_except(&self, frame: &str, except: ConnId) -> usize {
        // snapshot taken under the registry lock, sends happen outside it
        let targets = self.registry.active_targets(except).await;
        let mut delivered = 0;

        for (k, channel) in targets.iter() {
            match channel.send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("skipping broadcast target {}: {}", k, e),
            }
        }

        debug!("broadcast from {} reached {}/{} targets", except, delivered, targets.len());
        delivered
    }
}
