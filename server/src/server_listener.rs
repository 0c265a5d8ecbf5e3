use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Sender};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use protocol::{ChannelId, SchemaRegistry};

use crate::client_handler::{ClientHandler, Inbound};
use crate::error::{DeliveryError, HubError};
use crate::gate::ValidationGate;
use crate::registry::ConnectionRegistry;
use crate::server_types::{Channel, ConnId, Identity};

const COUNTER_SEED: u64 = 1;
const NOT_AUTHENTICATED: &str = "not authenticated";
// frames waiting for a slow client before sends to it start failing
const OUTBOUND_QUEUE: usize = 64;

#[derive(Clone)]
pub struct HubState {
    pub clients: ConnectionRegistry,
    pub schemas: Arc<dyn SchemaRegistry>,
    counter: Arc<AtomicU64>,
}

impl HubState {
    pub fn new(schemas: Arc<dyn SchemaRegistry>) -> Self {
        HubState {
            clients: ConnectionRegistry::new(),
            schemas,
            counter: Arc::new(AtomicU64::new(COUNTER_SEED)),
        }
    }

    /// The channel that frames arriving on `path` are validated against.
    pub fn endpoint_channel(&self, path: &str) -> Result<ChannelId, HubError> {
        self.schemas
            .resolve_channel(path)
            .ok_or_else(|| HubError::UnresolvedEndpoint(path.to_owned()))
    }

    fn next_id(&self) -> ConnId {
        self.counter.fetch_add(1, Ordering::Relaxed) // establish unique id for client
    }
}

// Admission parameters carried in the upgrade request's query string
#[derive(Debug, Deserialize)]
pub struct AdmissionQuery {
    username: Option<String>,
    color: Option<String>,
}

impl AdmissionQuery {
    fn identity(self) -> Result<Identity, HubError> {
        match (self.username, self.color) {
            (Some(username), Some(color)) => Identity::new(username, color)
                .ok_or(HubError::HandshakeRejected("username and color must be non-empty")),
            _ => Err(HubError::HandshakeRejected("username and color are required")),
        }
    }
}

// Outbound half of a websocket, fed to the writer task through a bounded queue.
// Sends never wait: a full queue fails the send instead of stalling the sender.
struct WsChannel {
    client_id: ConnId,
    tx: Sender<WsMessage>,
}

impl Channel for WsChannel {
    fn send(&self, frame: &str) -> Result<(), DeliveryError> {
        self.tx
            .try_send(WsMessage::Text(frame.to_owned().into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Full(self.client_id),
                TrySendError::Closed(_) => DeliveryError::Closed(self.client_id),
            })
    }

    fn close(&self) {
        if let Err(e) = self.tx.try_send(WsMessage::Close(None)) {
            debug!("client {} close frame not queued: {}", self.client_id, e);
        }
    }
}

pub struct ServerListener;

impl ServerListener {
    pub fn router(state: HubState, path: &str) -> Router {
        Router::new().route(path, get(ws_upgrade)).with_state(state)
    }

    /// Accept connections on `listener` until `shutdown` is cancelled.
    pub async fn serve(listener: TcpListener, state: HubState, path: &str, shutdown: CancellationToken)
                       -> io::Result<()> {
        info!("Server starting.. {:?} on path {}", listener.local_addr()?, path);

        axum::serve(listener, Self::router(state, path))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

/// GET <path>?username=..&color=..
/// Refuses the upgrade with 401 unless both admission parameters are present
/// and non-empty. The validation channel is resolved from the path here, once.
async fn ws_upgrade(
    State(state): State<HubState>,
    uri: Uri,
    query: Result<Query<AdmissionQuery>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match query.map_err(|_| HubError::HandshakeRejected("unreadable query")).and_then(|Query(q)| q.identity()) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("refusing upgrade on {}: {}", uri.path(), e);
            return (StatusCode::UNAUTHORIZED, NOT_AUTHENTICATED).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let channel = state.schemas.resolve_channel(uri.path());
    if channel.is_none() {
        warn!("no channel for path {}, frames from {} will be refused", uri.path(), &identity);
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity, channel))
}

async fn handle_socket(socket: WebSocket, state: HubState, identity: Identity, channel: Option<ChannelId>) {
    let client_id = state.next_id();
    info!("Server received new client connection {} as {}", client_id, &identity);

    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel::<WsMessage>(OUTBOUND_QUEUE);

    // writer task: drains the outbound queue into the socket
    let writer = tokio::spawn(ReceiverStream::new(rx).map(Ok).forward(sink));

    let inbound = Box::pin(stream.filter_map(move |msg| async move {
        match msg {
            Ok(WsMessage::Text(text)) => Some(Inbound::Frame(text.as_str().as_bytes().to_vec())),
            Ok(WsMessage::Binary(data)) => Some(Inbound::Frame(data.to_vec())),
            Ok(WsMessage::Close(frame)) => {
                debug!("client {} initiated close {:?}", client_id, frame);
                Some(Inbound::Closed)
            }
            Ok(_) => None, // ping/pong handled by the websocket layer
            Err(e) => {
                debug!("client {} receive error: {}", client_id, e);
                Some(Inbound::Closed)
            }
        }
    }));

    let gate = ValidationGate::new(Arc::clone(&state.schemas), channel);
    let handler = ClientHandler::new(client_id, identity, Arc::new(WsChannel { client_id, tx }),
                                     gate, state.clients.clone());
    handler.run(inbound).await;

    // all senders are gone once the handler is dropped, so the writer finishes
    // flushing whatever is queued (e.g. a rejection notice) and closes the sink
    match writer.await {
        Ok(Ok(())) => debug!("client {} writer finished", client_id),
        Ok(Err(e)) => debug!("client {} writer stopped: {}", client_id, e),
        Err(e) => warn!("client {} writer task failed: {}", client_id, e),
    }
}
