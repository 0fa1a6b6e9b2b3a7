//! WebSocket front door: long-lived JSON-RPC connections.
//!
//! Each connection gets one client channel.  A writer task drains the
//! channel's send queue so fan-out never blocks on the socket; the handler
//! task reads frames and dispatches them.  Ping/pong drives liveness; a
//! peer silent past the timeout is closed and detached.

use crate::channel::{ChannelKind, ClientChannel};
use crate::dispatch;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(90);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (channel, mut queue) = ClientChannel::pair(ChannelKind::WebSocket);
    info!(channel = channel.id(), "websocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: serialize queued frames onto the socket, one text frame per
    // JSON-RPC frame, plus periodic pings.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = queue.recv() => {
                    match frame {
                        Some(frame) => {
                            if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader: every text frame is a single JSON-RPC frame.  Any traffic
    // (including pongs) refreshes liveness.
    loop {
        match timeout(LIVENESS_TIMEOUT, ws_rx.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                dispatch::handle_frame(&state, &channel, text.as_str()).await;
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                debug!(channel = channel.id(), "websocket client disconnected");
                break;
            }
            Ok(Some(Ok(Message::Binary(_)))) => {
                debug!(channel = channel.id(), "ignoring binary frame");
            }
            Ok(Some(Err(e))) => {
                debug!(channel = channel.id(), error = %e, "websocket error");
                break;
            }
            Err(_) => {
                info!(channel = channel.id(), "websocket liveness timeout");
                break;
            }
        }
    }

    dispatch::detach_everywhere(&state, &channel).await;
    writer.abort();
    info!(channel = channel.id(), "websocket channel detached");
}
