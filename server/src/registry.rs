use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DuplicateIdentity;
use crate::names::Names;
use crate::server_types::{Admission, ChannelRef, ConnId, Identity};

// current client registry data
pub type RegistryEntry = (Identity, ChannelRef);

// broadcast target captured from a registry snapshot
pub type Target = (ConnId, ChannelRef);

struct Clients {
    entries: HashMap<ConnId, RegistryEntry>,
    names: Names,
}

/// Active connections and their claimed identities.
///
/// One lock guards both the connection map and the identity index, so the
/// uniqueness check and the insert happen atomically.
#[derive(Clone)]
pub struct ConnectionRegistry {
    clients: Arc<Mutex<Clients>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            clients: Arc::new(Mutex::new(Clients {
                entries: HashMap::new(),
                names: Names::new(),
            })),
        }
    }

    /// Admit `id` under `identity`, or report which field is already taken.
    /// On acceptance `count` is the registry size including the new entry.
    pub async fn register(&self, id: ConnId, identity: Identity, channel: ChannelRef) -> Admission {
        let mut lg = self.clients.lock().await;

        if lg.entries.contains_key(&id) {
            debug!("connection {} is already registered", id);
            return Admission::Rejected(DuplicateIdentity::Connection);
        }

        if let Err(dup) = lg.names.insert(&identity) {
            debug!("rejecting {} for connection {}: {}", &identity, id, dup);
            return Admission::Rejected(dup);
        }

        info!("client {} registered as {}", id, &identity);
        lg.entries.insert(id, (identity, channel));

        Admission::Accepted { count: lg.entries.len() }
    }

    /// Remove `id` if present. Safe to call repeatedly.
    pub async fn unregister(&self, id: ConnId) -> Option<Identity> {
        let mut lg = self.clients.lock().await;

        let (identity, _channel) = lg.entries.remove(&id)?;
        // keep names consistent to reflect client is gone
        lg.names.remove(&identity);
        info!("client {} ({}) unregistered", id, &identity);

        Some(identity)
    }

    /// Snapshot of every active connection except `excluding`, in no particular order.
    pub async fn active_targets(&self, excluding: ConnId) -> Vec<Target> {
        let lg = self.clients.lock().await;

        lg.entries
            .iter()
            .filter(|(k, _)| **k != excluding)
            .map(|(k, (_identity, channel))| (*k, Arc::clone(channel)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: ConnId) -> bool {
        self.clients.lock().await.entries.contains_key(&id)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
