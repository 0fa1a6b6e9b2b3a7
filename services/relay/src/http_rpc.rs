//! HTTP front door: one JSON-RPC request per POST.
//!
//! The handler builds a one-shot client channel, dispatches the frame
//! exactly as a WebSocket frame would be dispatched, then drains the
//! channel queue until the matching response appears.  Notifications that
//! arrive meanwhile were already journaled and are simply not returned on
//! this transport.  The original clients POST to method-named paths
//! (`/session/new`, `/session/prompt`), so any path is accepted; dispatch
//! keys on the body's `method`.

use crate::channel::{ChannelKind, ClientChannel};
use crate::dispatch;
use crate::error::RelayError;
use crate::state::AppState;
use acp_protocol::FrameKind;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Upper bound on one HTTP request/response exchange, including the whole
/// agent turn behind a `session/prompt`.
pub const HTTP_RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .route("/{*path}", post(handle_rpc))
        .with_state(state)
}

async fn handle_rpc(State(state): State<AppState>, body: String) -> Json<Value> {
    let (channel, mut queue) = ClientChannel::pair(ChannelKind::HttpOneShot);

    // Learn the id up front so the wait loop can match the response; the
    // dispatcher re-validates and produces the error frames itself.
    let expected_id = acp_protocol::parse_frame(&body)
        .ok()
        .and_then(|f| acp_protocol::id(&f).cloned())
        .unwrap_or(Value::Null);

    dispatch::handle_frame(&state, &channel, &body).await;

    let deadline = Instant::now() + HTTP_RESPONSE_TIMEOUT;
    let reply = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, queue.recv()).await {
            Ok(Some(frame)) => {
                let is_response = matches!(
                    acp_protocol::classify(&frame),
                    Ok(FrameKind::Response)
                );
                if is_response
                    && acp_protocol::id(&frame).unwrap_or(&Value::Null) == &expected_id
                {
                    break frame;
                }
                debug!("discarding non-matching frame on http one-shot channel");
            }
            Ok(None) => {
                break RelayError::ChannelClosed.to_frame(expected_id);
            }
            Err(_) => {
                break RelayError::Timeout(HTTP_RESPONSE_TIMEOUT).to_frame(expected_id);
            }
        }
    };

    dispatch::detach_everywhere(&state, &channel).await;
    Json(reply)
}
