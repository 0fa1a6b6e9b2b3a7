//! A minimal WebSocket JSON-RPC client for exercising the relay.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default patience for a single frame in tests.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MockWsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl MockWsClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:PORT`).
    pub async fn connect(url: &str) -> Result<Self, tokio_tungstenite::tungstenite::Error> {
        let (ws, _resp) = connect_async(url).await?;
        Ok(MockWsClient { ws })
    }

    /// Send one JSON-RPC frame as a single text frame.
    pub async fn send_frame(
        &mut self,
        frame: &Value,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        self.ws.send(Message::Text(frame.to_string().into())).await
    }

    /// Receive the next JSON-RPC frame, skipping ping/pong traffic.
    /// Returns `None` on close or timeout.
    pub async fn recv_frame(&mut self) -> Option<Value> {
        self.recv_frame_within(RECV_TIMEOUT).await
    }

    pub async fn recv_frame_within(&mut self, limit: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return serde_json::from_str(text.as_str()).ok();
                }
                Ok(Some(Ok(Message::Ping(data)))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Ok(Some(Ok(Message::Pong(_)))) => {}
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Receive frames until the response carrying `id` arrives, returning
    /// every frame seen (the response is last).  `None` if the connection
    /// closes or the timeout passes first.
    pub async fn recv_until_response(&mut self, id: &Value, limit: Duration) -> Option<Vec<Value>> {
        let deadline = tokio::time::Instant::now() + limit;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = self.recv_frame_within(remaining).await?;
            let done = frame.get("method").is_none() && frame.get("id") == Some(id);
            seen.push(frame);
            if done {
                return Some(seen);
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
