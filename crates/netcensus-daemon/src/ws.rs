//! WebSocket handler for real-time discovery events

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use netcensus_discovery::DiscoveryEvent;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Messages the server sends besides discovery events
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ControlMessage {
    /// Events were dropped because the client fell behind
    Lagged { skipped: u64 },
    Pong,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode_event(event: &DiscoveryEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();
    let shutdown = state.shutdown.clone();

    info!("WebSocket client connected");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            // Forward discovery events to client
            event = events.recv() => {
                let json = match event {
                    Ok(event) => encode_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped = skipped, "WebSocket client lagged");
                        serde_json::to_string(&ControlMessage::Lagged { skipped }).ok()
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Some(json) = json {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Application-level keepalive
                        if text.as_str() == "ping" {
                            if let Ok(pong) = serde_json::to_string(&ControlMessage::Pong) {
                                if sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
