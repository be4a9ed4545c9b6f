use feed_media_core::config::AppConfig;
use feed_media_core::services::relay::LocationRelay;
use feed_media_core::services::storage::InMemoryObjectStore;
use feed_media_core::{AppState, create_app};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SEOUL: &str = r#"{"coordinate":{"latitude":37.5665,"longitude":126.978},"timestamp":"2026-10-16T09:30:00Z"}"#;

async fn spawn_server() -> (SocketAddr, Arc<LocationRelay>) {
    let store = Arc::new(InMemoryObjectStore::new("http://media.test"));
    let state = AppState::new(store, AppConfig::development());
    let relay = state.relay.clone();
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, relay)
}

async fn wait_for_connections(relay: &LocationRelay, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {} connections, have {}",
            expected,
            relay.connection_count()
        )
    });
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/location", addr)).await.unwrap();
    ws
}

/// Next text frame, or None if nothing arrives within `wait`.
async fn next_text(ws: &mut Client, wait: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next()).await.ok()??;
        match frame.ok()? {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_position_reaches_other_peers_only() {
    let (addr, relay) = spawn_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_connections(&relay, 3).await;

    a.send(Message::Text(SEOUL.to_string())).await.unwrap();

    for peer in [&mut b, &mut c] {
        let text = next_text(peer, Duration::from_secs(2)).await.expect("peer got nothing");
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["coordinate"]["latitude"], 37.5665);
        assert!(json["senderId"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(next_text(peer, Duration::from_millis(150)).await.is_none());
    }
    assert!(next_text(&mut a, Duration::from_millis(150)).await.is_none());
}

#[tokio::test]
async fn test_malformed_payload_is_not_relayed() {
    let (addr, relay) = spawn_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_connections(&relay, 2).await;

    a.send(Message::Text("{\"coordinate\": \"somewhere\"}".to_string()))
        .await
        .unwrap();
    assert!(next_text(&mut b, Duration::from_millis(200)).await.is_none());

    // Sender is still connected and still relayed
    assert_eq!(relay.connection_count(), 2);
    a.send(Message::Text(SEOUL.to_string())).await.unwrap();
    assert!(next_text(&mut b, Duration::from_secs(2)).await.is_some());
}

#[tokio::test]
async fn test_departed_peer_does_not_disturb_others() {
    let (addr, relay) = spawn_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_connections(&relay, 3).await;

    b.close(None).await.unwrap();
    a.send(Message::Text(SEOUL.to_string())).await.unwrap();

    assert!(next_text(&mut c, Duration::from_secs(2)).await.is_some());
    wait_for_connections(&relay, 2).await;

    // A is unaffected and can keep sending
    a.send(Message::Text(SEOUL.to_string())).await.unwrap();
    assert!(next_text(&mut c, Duration::from_secs(2)).await.is_some());
}

#[tokio::test]
async fn test_relay_shutdown_closes_clients() {
    let (addr, relay) = spawn_server().await;
    let mut a = connect(addr).await;
    wait_for_connections(&relay, 1).await;

    assert_eq!(relay.shutdown(), 1);

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "client never saw the close");
    assert_eq!(relay.connection_count(), 0);
}
