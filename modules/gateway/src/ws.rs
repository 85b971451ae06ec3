use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::proxy::GatewayState;
use crate::registry::WsRegistry;

/// Subscription parameters. `user_id` is mandatory: a client that does not
/// say who it is gets a 400 from the extractor before any upgrade happens.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: i64,
}

/// Handler for GET /ws?user_id=, upgrading to a WebSocket and registering
/// the connection under the user id.
pub async fn ws_handler(
    Query(query): Query<WsQuery>,
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry, query.user_id))
}

async fn handle_socket(socket: WebSocket, registry: Arc<WsRegistry>, user_id: i64) {
    let (mut sink, mut stream) = socket.split();
    let (connection_id, mut receiver) = registry.add(user_id).await;
    tracing::info!(user_id, connection_id, "websocket connected");

    // Writer task: drains the registry channel into the socket. A write
    // error ends it, which the loop below treats as a disconnect.
    let mut writer = tokio::spawn(async move {
        while let Some(text) = receiver.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // The read loop exists only to detect disconnection; inbound frames
    // carry nothing we use.
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    registry.remove(user_id, connection_id).await;
    writer.abort();
    tracing::info!(user_id, connection_id, "websocket disconnected");
}
