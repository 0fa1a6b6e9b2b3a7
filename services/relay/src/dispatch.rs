//! Front-door dispatch: one client frame in, lifecycle handled here,
//! content routed into the target session.
//!
//! Both transports feed this path, so an HTTP one-shot frame takes exactly
//! the route a WebSocket frame would.  Every outcome, errors included, is
//! delivered through the channel's send queue, which is what
//! the HTTP handler polls and the WebSocket writer task drains.

use crate::channel::{ChannelKind, ClientChannel, BACKPRESSURE_TIMEOUT};
use crate::error::RelayError;
use crate::state::AppState;
use crate::storage::journal::Direction;
use acp_protocol::{methods, FrameKind};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle one raw text frame from a client channel.
pub async fn handle_frame(state: &AppState, channel: &Arc<ClientChannel>, raw: &str) {
    let frame = match acp_protocol::parse_frame(raw) {
        Ok(frame) => frame,
        Err(e) => {
            deliver(
                channel,
                RelayError::Malformed(e.to_string()).to_frame(Value::Null),
            )
            .await;
            return;
        }
    };

    let kind = match acp_protocol::classify(&frame) {
        Ok(kind) => kind,
        Err(e) => {
            deliver(
                channel,
                RelayError::Malformed(e.to_string()).to_frame(Value::Null),
            )
            .await;
            return;
        }
    };

    // HTTP carries exactly one request per connection.
    if channel.kind() == ChannelKind::HttpOneShot && kind != FrameKind::Request {
        let id = acp_protocol::id(&frame).cloned().unwrap_or(Value::Null);
        deliver(
            channel,
            RelayError::MethodNotAllowed(
                "only JSON-RPC requests are accepted over HTTP".to_owned(),
            )
            .to_frame(id),
        )
        .await;
        return;
    }

    if kind == FrameKind::Request {
        if let Some(method) = acp_protocol::method(&frame) {
            if methods::is_lifecycle(method) {
                handle_lifecycle(state, channel, &frame, method).await;
                return;
            }
        }
    }

    route_content(state, channel, frame, kind).await;
}

// ---------------------------------------------------------------------------
// Lifecycle methods (handled by the relay, never forwarded)
// ---------------------------------------------------------------------------

async fn handle_lifecycle(
    state: &AppState,
    channel: &Arc<ClientChannel>,
    frame: &Value,
    method: &str,
) {
    let id = acp_protocol::id(frame).cloned().unwrap_or(Value::Null);

    match method {
        methods::SESSION_NEW => {
            let Some(dir) = param_str(frame, "workingDirectory") else {
                deliver(
                    channel,
                    RelayError::Malformed(
                        "session/new requires params.workingDirectory".to_owned(),
                    )
                    .to_frame(id),
                )
                .await;
                return;
            };
            match state.registry.create(&dir).await {
                Ok(session) => {
                    journal_client_frame(state, session.id(), frame).await;
                    let _ = session.attach(channel).await;
                    let response =
                        acp_protocol::response(id, json!({ "sessionId": session.id() }));
                    journal_response(state, session.id(), &response).await;
                    deliver(channel, response).await;
                }
                Err(e) => {
                    warn!(error = %e, "session/new failed");
                    deliver(channel, e.to_frame(id)).await;
                }
            }
        }
        methods::SESSION_RESUME => {
            let Some(session_id) = param_str(frame, "sessionId") else {
                deliver(
                    channel,
                    RelayError::Malformed("session/resume requires params.sessionId".to_owned())
                        .to_frame(id),
                )
                .await;
                return;
            };
            match state.registry.resume(&session_id).await {
                Ok(session) => {
                    journal_client_frame(state, session.id(), frame).await;
                    let _ = session.attach(channel).await;
                    let response =
                        acp_protocol::response(id, json!({ "sessionId": session.id() }));
                    journal_response(state, session.id(), &response).await;
                    deliver(channel, response).await;
                }
                Err(e) => {
                    let error = e.to_frame(id);
                    journal_response(state, &session_id, &error).await;
                    deliver(channel, error).await;
                }
            }
        }
        methods::SESSION_CLOSE => {
            let Some(session_id) = param_str(frame, "sessionId") else {
                deliver(
                    channel,
                    RelayError::Malformed("session/close requires params.sessionId".to_owned())
                        .to_frame(id),
                )
                .await;
                return;
            };
            journal_client_frame(state, &session_id, frame).await;
            match state.registry.close(&session_id).await {
                Ok(()) => {
                    let response = acp_protocol::response(id, json!({}));
                    journal_response(state, &session_id, &response).await;
                    deliver(channel, response).await;
                }
                Err(e) => {
                    let error = e.to_frame(id);
                    journal_response(state, &session_id, &error).await;
                    deliver(channel, error).await;
                }
            }
        }
        _ => unreachable!("is_lifecycle gated the method"),
    }
}

// ---------------------------------------------------------------------------
// Content frames (routed into a session)
// ---------------------------------------------------------------------------

async fn route_content(
    state: &AppState,
    channel: &Arc<ClientChannel>,
    frame: Value,
    kind: FrameKind,
) {
    // Prefer the frame's own sessionId; responses to reverse requests have
    // none and rely on the channel's binding from session/new or resume.
    let session_id = param_str(&frame, "sessionId").or_else(|| channel.bound_session());
    let Some(session_id) = session_id else {
        if kind == FrameKind::Request {
            let id = acp_protocol::id(&frame).cloned().unwrap_or(Value::Null);
            deliver(
                channel,
                RelayError::SessionNotFound(
                    "frame carries no sessionId and the channel is not bound".to_owned(),
                )
                .to_frame(id),
            )
            .await;
        } else {
            debug!("dropping unbound non-request client frame");
        }
        return;
    };

    match state.registry.lookup(&session_id).await {
        Ok(session) => {
            let _ = session.attach(channel).await;
            session.handle_client_frame(channel, frame).await;
        }
        Err(e) => {
            if kind == FrameKind::Request {
                let id = acp_protocol::id(&frame).cloned().unwrap_or(Value::Null);
                let error = e.to_frame(id);
                journal_response(state, &session_id, &error).await;
                deliver(channel, error).await;
            } else {
                debug!(session_id = %session_id, error = %e, "dropping client frame for unavailable session");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Detach a channel from every session it touched; called by transports at
/// connection teardown.
pub async fn detach_everywhere(state: &AppState, channel: &Arc<ClientChannel>) {
    if let Some(session_id) = channel.bound_session() {
        if let Ok(session) = state.registry.lookup(&session_id).await {
            session.detach(channel.id()).await;
        }
    }
}

fn param_str(frame: &Value, key: &str) -> Option<String> {
    acp_protocol::params(frame)
        .and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

async fn deliver(channel: &Arc<ClientChannel>, frame: Value) {
    if let Err(e) = channel.deliver(frame, BACKPRESSURE_TIMEOUT).await {
        debug!(channel = channel.id(), error = %e, "could not deliver frame to client");
    }
}

async fn journal_client_frame(state: &AppState, session_id: &str, frame: &Value) {
    let mut journal = state.journal.lock().await;
    if let Err(e) = journal.append_frame(session_id, Direction::ClientToRelay, frame) {
        warn!(session_id = %session_id, error = %e, "journal append failed for lifecycle request");
    }
}

async fn journal_response(state: &AppState, session_id: &str, frame: &Value) {
    let mut journal = state.journal.lock().await;
    if let Err(e) = journal.append_frame(session_id, Direction::RelayToClient, frame) {
        warn!(session_id = %session_id, error = %e, "journal append failed for lifecycle response");
    }
}
