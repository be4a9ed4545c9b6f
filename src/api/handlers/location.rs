use std::sync::Arc;

use crate::AppState;
use crate::services::relay::{ConnectionHandle, ConnectionId, ConnectionState, LocationRelay};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::debug;

/// WebSocket upgrade for the location relay. Any origin is accepted.
pub async fn location_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<LocationRelay>) {
    let ConnectionHandle {
        connection,
        mut outbound,
    } = relay.on_connect(ConnectionId::new());
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drain the outbound queue until the connection leaves Open
    let writer_relay = Arc::clone(&relay);
    let writer_conn = Arc::clone(&connection);
    let mut writer = tokio::spawn(async move {
        let mut lifecycle = writer_conn.subscribe();
        loop {
            tokio::select! {
                msg = outbound.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                // Ref must be dropped before the select resolves so the task stays Send
                _ = async {
                    let _ = lifecycle.wait_for(|state| *state != ConnectionState::Open).await;
                } => {
                    // Flush what was queued before the close, then say goodbye
                    while let Ok(text) = outbound.try_recv() {
                        if ws_tx.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        writer_relay.close(&writer_conn);
        writer_conn.mark_closed();
    });

    let reader_relay = Arc::clone(&relay);
    let reader_id = connection.id().clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    reader_relay.on_message(&reader_id, &text);
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(conn_id = %reader_id, error = %e, "Location socket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {
            reader.abort();
        }
        _ = &mut reader => {
            relay.close(&connection);
            let _ = writer.await;
        }
    }
}
