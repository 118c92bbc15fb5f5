//! WebSocket push channel.
//!
//! Each connection first receives the current casting state, then every
//! [`BroadcastEvent`](crate::events::BroadcastEvent) as JSON text. Incoming
//! messages other than close are ignored.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::api::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn initial_state(state: &AppState) -> Option<Message> {
    let body = json!({
        "category": "initialState",
        "state": state.orchestrator.casting_state(),
    });
    serde_json::to_string(&body)
        .ok()
        .map(|s| Message::Text(s.into()))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.event_bridge.subscribe();
    let cancel = state.cancel_token.clone();

    log::info!("[WS] New connection established");

    if let Some(msg) = initial_state(&state) {
        if sender.send(msg).await.is_err() {
            log::warn!("[WS] Failed to send initial state, client disconnected");
            return;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    log::warn!("[WS] Client lagged, skipped {} event(s)", n);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    log::info!("[WS] Connection closed");
}
