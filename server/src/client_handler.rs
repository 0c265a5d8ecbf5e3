use std::panic::AssertUnwindSafe;

use futures::{FutureExt, Stream, StreamExt};
use tracing::{debug, error, info, warn};

use protocol::Message;

use crate::delivery::Delivery;
use crate::error::HubError;
use crate::gate::ValidationGate;
use crate::registry::ConnectionRegistry;
use crate::server_types::{Admission, ChannelRef, ConnId, ConnState, Identity};

/// Transport events for one connection, in arrival order.
#[derive(Debug)]
pub enum Inbound {
    Frame(Vec<u8>),
    Closed,
}

// Handles server communication from client
// Essentially this models a client actor on the server side:
// Pending -> Active -> Closed, or Pending -> Closed on a rejected identity
pub struct ClientHandler {
    client_id: ConnId,
    identity: Identity,
    channel: ChannelRef,
    gate: ValidationGate,
    clients: ConnectionRegistry,
    outgoing: Delivery,
    state: ConnState,
}

impl ClientHandler {
    pub fn new(client_id: ConnId, identity: Identity, channel: ChannelRef, gate: ValidationGate,
               clients: ConnectionRegistry) -> Self {
        let outgoing = Delivery::new(&clients);

        Self {
            client_id,
            identity,
            channel,
            gate,
            clients,
            outgoing,
            state: ConnState::Pending,
        }
    }

    pub fn client_id(&self) -> ConnId {
        self.client_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Drive the connection until its inbound stream ends or reports a close.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        // if registration is successful then only handle client reads
        if self.register().await.is_err() {
            return;
        }

        while let Some(event) = inbound.next().await {
            match event {
                Inbound::Frame(raw) => self.handle_frame(&raw).await,
                Inbound::Closed => break,
            }
        }

        self.process_disconnect().await;
    }

    /// Claim the identity. On success the client gets its join acknowledgment;
    /// on a duplicate it gets an error notice and its channel is closed.
    pub async fn register(&mut self) -> Result<usize, HubError> {
        if self.state != ConnState::Pending {
            return Err(HubError::InternalFault(format!(
                "client {} registering in state {:?}",
                self.client_id, self.state
            )));
        }

        let admission = self
            .clients
            .register(self.client_id, self.identity.clone(), self.channel.clone())
            .await;

        match admission {
            Admission::Accepted { count } => {
                self.state = ConnState::Active;
                info!("client {} joined as {}, {} connected", self.client_id, &self.identity, count);
                self.notify(&Message::joined(count));
                Ok(count)
            }
            Admission::Rejected(dup) => {
                warn!("client {} rejected as {}: {}", self.client_id, &self.identity, dup);
                self.notify(&Message::error(dup.to_string()));
                self.channel.close();
                self.state = ConnState::Closed;
                Err(dup.into())
            }
        }
    }

    /// Validate one inbound frame and relay it to everyone else. Failures are
    /// reported to this client only and never change its state.
    pub async fn handle_frame(&mut self, raw: &[u8]) {
        if self.state != ConnState::Active {
            debug!("client {} ignoring frame in state {:?}", self.client_id, self.state);
            return;
        }

        let outcome = AssertUnwindSafe(self.relay(raw)).catch_unwind().await;
        let result = outcome.unwrap_or_else(|_| {
            Err(HubError::InternalFault(format!("panic while handling frame from {}", self.client_id)))
        });

        match result {
            Ok(delivered) => debug!("client {} frame relayed to {} peers", self.client_id, delivered),
            Err(e @ HubError::InternalFault(_)) => {
                error!("client {} unexpected error: {}", self.client_id, e);
                self.notify(&Message::error(e.notice_text()));
            }
            Err(e) => {
                warn!("client {} sent invalid frame: {}", self.client_id, e);
                self.notify(&Message::error(e.notice_text()));
            }
        }
    }

    async fn relay(&self, raw: &[u8]) -> Result<usize, HubError> {
        let validated = self.gate.validate(raw)?;
        Ok(self.outgoing.broadcast_except(&validated.frame, self.client_id).await)
    }

    // process client disconnection event
    pub async fn process_disconnect(&mut self) {
        match self.state {
            ConnState::Active => {
                if self.clients.unregister(self.client_id).await.is_some() {
                    info!("User {} has left", &self.identity);
                }
            }
            ConnState::Pending => debug!("client {} closed before admission", self.client_id),
            ConnState::Closed => return,
        }
        self.state = ConnState::Closed;
    }

    // single send back to this client only
    fn notify(&self, msg: &Message) {
        let frame = match msg.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!("unable to encode {} for client {}: {}", msg.kind(), self.client_id, e);
                return;
            }
        };

        if let Err(e) = self.outgoing.send(&self.channel, &frame) {
            debug!("unable to notify client {}: {}", self.client_id, e);
        }
    }
}
