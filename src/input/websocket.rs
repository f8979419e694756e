//! WebSocket input channel (`/api/ws`)
//!
//! Binary protocol only; see [`super::protocol`] for the message layout.
//! The server pushes the current viewer count on connect and after every
//! change, and answers clipboard requests on the same socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use super::protocol::{InputEvent, ServerMessage};
use super::InputHandler;
use crate::state::AppState;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// WebSocket input upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn binary(message: ServerMessage) -> Message {
    Message::Binary(message.encode().to_vec())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let log_throttler = LogThrottler::with_secs(5);
    let mut handler = InputHandler::new(state.input.clone(), state.config.screen());
    let mut counts = state.viewers.subscribe();

    info!("Input WebSocket connected ({} backend)", state.input.name());

    let initial = ServerMessage::ViewerCount(state.viewers.get());
    if sender.send(binary(initial)).await.is_err() {
        debug!("Input WebSocket closed before the initial viewer count");
        return;
    }

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let reply = match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let Some(event) = InputEvent::decode(&data) else {
                            if log_throttler.should_log("malformed") {
                                debug!("Ignoring malformed input message ({} bytes)", data.len());
                            }
                            continue;
                        };
                        match handler.handle(event).await {
                            Ok(reply) => reply.map(binary),
                            Err(e) => {
                                warn_throttled!(log_throttler, "backend", "Input injection failed: {}", e);
                                None
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => Some(Message::Pong(data)),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Input WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => None,
                };
                if let Some(reply) = reply {
                    if sender.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            count = counts.recv() => {
                let count = match count {
                    Ok(count) => count,
                    Err(RecvError::Lagged(_)) => state.viewers.get(),
                    Err(RecvError::Closed) => break,
                };
                if sender.send(binary(ServerMessage::ViewerCount(count))).await.is_err() {
                    break;
                }
            }
        }
    }

    handler.release_all().await;
    info!("Input WebSocket disconnected");
}
