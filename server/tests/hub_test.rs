//! End-to-end tests over real websockets: admission, relay, validation and eviction.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use protocol::Contract;
use server::server_listener::{HubState, ServerListener};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CHAT: &str = r#"{"type":"chat","text":"hi","timestamp":"2024-01-01T00:00:00Z"}"#;

struct Hub {
    addr: SocketAddr,
    state: HubState,
    shutdown: CancellationToken,
    serving: JoinHandle<io::Result<()>>,
}

/// Start the hub on an ephemeral port, routing websockets on `path`.
async fn start_hub_at(path: &'static str) -> Hub {
    let state = HubState::new(Arc::new(Contract::embedded().unwrap()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let serving = tokio::spawn(ServerListener::serve(listener, state.clone(), path, shutdown.clone()));

    Hub { addr, state, shutdown, serving }
}

async fn start_hub() -> (SocketAddr, HubState) {
    let hub = start_hub_at("/").await;
    (hub.addr, hub.state)
}

async fn join_at(addr: SocketAddr, path: &str, username: &str, color: &str) -> Ws {
    let url = format!("ws://{}{}?username={}&color={}", addr, path, username, color);
    let (ws, _resp) = connect_async(url).await.expect("upgrade should succeed");
    ws
}

async fn join(addr: SocketAddr, username: &str, color: &str) -> Ws {
    join_at(addr, "/", username, color).await
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("receive error");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    assert!(
        timeout(Duration::from_millis(200), ws.next()).await.is_err(),
        "expected no frame"
    );
}

async fn wait_for_len(state: &HubState, expected: usize) {
    for _ in 0..200 {
        if state.clients.len().await == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("registry never reached {} connections", expected);
}

#[tokio::test]
async fn first_join_is_acknowledged_with_count_one() {
    let (addr, _state) = start_hub().await;
    let mut ann = join(addr, "ann", "red").await;

    assert_eq!(next_json(&mut ann).await, json!({"num_connections": 1, "status": 1}));
}

#[tokio::test]
async fn duplicate_username_is_rejected_and_closed() {
    let (addr, state) = start_hub().await;
    let mut ann = join(addr, "ann", "red").await;
    next_json(&mut ann).await;

    let mut dup = join(addr, "ANN", "blue").await;
    let notice = next_json(&mut dup).await;
    assert_eq!(notice["type"], "error");
    assert_eq!(notice["text"], "user with this name already exists");

    match timeout(Duration::from_secs(2), dup.next()).await.unwrap() {
        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
        other => panic!("expected close, got {:?}", other),
    }
    assert_eq!(state.clients.len().await, 1);
}

#[tokio::test]
async fn duplicate_color_is_rejected() {
    let (addr, _state) = start_hub().await;
    let mut ann = join(addr, "ann", "red").await;
    next_json(&mut ann).await;

    let mut bob = join(addr, "bob", "Red").await;
    let notice = next_json(&mut bob).await;
    assert_eq!(notice["text"], "user with this color already exists");
}

#[tokio::test]
async fn chat_is_relayed_verbatim_to_others_only() {
    let (addr, _state) = start_hub().await;
    let mut a = join(addr, "ann", "red").await;
    next_json(&mut a).await;
    let mut b = join(addr, "bob", "blue").await;
    assert_eq!(next_json(&mut b).await["num_connections"], 2);

    a.send(Message::text(CHAT.to_owned())).await.unwrap();

    let relayed = timeout(Duration::from_secs(2), b.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(relayed.to_text().unwrap(), CHAT);
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn malformed_drawing_only_errors_the_sender() {
    let (addr, _state) = start_hub().await;
    let mut a = join(addr, "ann", "red").await;
    next_json(&mut a).await;
    let mut b = join(addr, "bob", "blue").await;
    next_json(&mut b).await;

    let drawing = r#"{"type":"drawing","positionX":12,"color":"red"}"#;
    a.send(Message::text(drawing.to_owned())).await.unwrap();

    let notice = next_json(&mut a).await;
    assert_eq!(notice["type"], "error");
    assert!(notice["text"].as_str().unwrap().contains("positionY"));
    assert_silent(&mut b).await;

    // still active: a valid frame goes through afterwards
    a.send(Message::text(CHAT.to_owned())).await.unwrap();
    assert_eq!(next_json(&mut b).await["text"], "hi");
}

#[tokio::test]
async fn closed_peer_is_evicted() {
    let (addr, state) = start_hub().await;
    let mut a = join(addr, "ann", "red").await;
    next_json(&mut a).await;
    let mut b = join(addr, "bob", "blue").await;
    next_json(&mut b).await;
    wait_for_len(&state, 2).await;

    drop(b);
    wait_for_len(&state, 1).await;

    a.send(Message::text(CHAT.to_owned())).await.unwrap();
    assert_silent(&mut a).await;

    // the name and color are free again
    let mut again = join(addr, "bob", "blue").await;
    assert_eq!(next_json(&mut again).await["num_connections"], 2);
}

#[tokio::test]
async fn missing_admission_parameters_get_401() {
    let (addr, state) = start_hub().await;

    for url in [
        format!("ws://{}/?username=ann", addr),
        format!("ws://{}/?username=&color=red", addr),
        format!("ws://{}/", addr),
    ] {
        match connect_async(url).await {
            Err(WsError::Http(resp)) => assert_eq!(resp.status(), 401),
            other => panic!("expected 401, got {:?}", other.map(|(_, r)| r.status())),
        }
    }
    assert!(state.clients.is_empty().await);
}

#[tokio::test]
async fn binary_frames_are_validated_and_relayed_as_text() {
    let (addr, _state) = start_hub().await;
    let mut a = join(addr, "ann", "red").await;
    next_json(&mut a).await;
    let mut b = join(addr, "bob", "blue").await;
    next_json(&mut b).await;

    a.send(Message::binary(CHAT.as_bytes().to_vec())).await.unwrap();

    let relayed = timeout(Duration::from_secs(2), b.next()).await.unwrap().unwrap().unwrap();
    assert!(relayed.is_text());
    assert_eq!(relayed.to_text().unwrap(), CHAT);
    assert_silent(&mut a).await;

    // a binary frame that isn't JSON only errors the sender
    a.send(Message::binary(vec![0xff, 0x00, 0x7b])).await.unwrap();
    assert_eq!(next_json(&mut a).await["type"], "error");
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn frames_on_an_unresolved_path_get_errors_and_stay_open() {
    let hub = start_hub_at("/draw").await;
    let mut a = join_at(hub.addr, "/draw", "ann", "red").await;
    assert_eq!(next_json(&mut a).await["num_connections"], 1);
    let mut b = join_at(hub.addr, "/draw", "bob", "blue").await;
    next_json(&mut b).await;

    for _ in 0..2 {
        a.send(Message::text(CHAT.to_owned())).await.unwrap();

        let notice = next_json(&mut a).await;
        assert_eq!(notice["type"], "error");
        assert_eq!(notice["text"], "connection has no channel to validate against");
        assert_silent(&mut b).await;
    }
    assert_eq!(hub.state.clients.len().await, 2);
}

#[tokio::test]
async fn cancelling_shutdown_stops_the_server() {
    let hub = start_hub_at("/").await;
    let mut a = join(hub.addr, "ann", "red").await;
    next_json(&mut a).await;
    a.close(None).await.unwrap();
    wait_for_len(&hub.state, 0).await;

    hub.shutdown.cancel();

    let result = timeout(Duration::from_secs(5), hub.serving)
        .await
        .expect("serve did not return after cancellation")
        .expect("serve task panicked");
    assert!(result.is_ok());
    assert!(connect_async(format!("ws://{}/?username=bob&color=blue", hub.addr)).await.is_err());
}
