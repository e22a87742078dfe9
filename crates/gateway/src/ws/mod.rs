//! WebSocket endpoint (spec.md §6.1).
//!
//! Flow: client connects to `/ws`, the gateway registers a connection and
//! spawns a writer task draining its outbound channel, then reads inbound
//! frames until the socket closes.

pub mod connection;
pub mod handlers;
pub mod projector;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use tf_protocol::ws::WsFrame;

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let connection_id = state.connections.register(
        outbound_tx,
        state.config.server.default_pipeline_mode,
        state.config.llm.model_choice,
    );

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                match serde_json::from_str::<WsFrame>(&text) {
                    Ok(frame) => handlers::dispatch(&state, connection_id, frame.message).await,
                    Err(e) => {
                        tracing::debug!(%connection_id, error = %e, "ignoring unparseable frame");
                        state.connections.bump_contract_violation("unparseable_frame");
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                state.connections.touch_ping(connection_id);
            }
            _ => {}
        }
    }

    writer.abort();
    state.connections.remove(connection_id);
    tracing::info!(%connection_id, "ws connection closed");
}
