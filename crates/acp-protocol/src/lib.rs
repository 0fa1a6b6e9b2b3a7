// acp-protocol: JSON-RPC 2.0 framing for the Agent Client Protocol relay.
//
// Frames cross the relay as one JSON object per line (agent stdio) or per
// WebSocket text frame / HTTP body (clients).  The relay never deserializes
// a frame into a closed struct on the routing path; frames stay
// `serde_json::Value` so unknown top-level members survive forwarding.
// This crate owns classification, id handling, and the stable error codes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub mod methods;

/// Protocol version the relay declares in `initialize`.
pub const PROTOCOL_VERSION: i64 = 1;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The three JSON-RPC frame shapes the relay routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Has `method` and `id`.
    Request,
    /// Has `id` but no `method`; exactly one of `result` / `error`.
    Response,
    /// Has `method` but no `id`.
    Notification,
}

impl FrameKind {
    /// Journal `message_type` string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Request => "request",
            FrameKind::Response => "response",
            FrameKind::Notification => "notification",
        }
    }
}

/// Reasons a frame fails codec validation.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has neither method nor id")]
    Unclassifiable,
    #[error("request id must be a string or number")]
    BadId,
    #[error("response must carry exactly one of result/error")]
    BadResponse,
}

/// Parse a single line (or WS text frame / HTTP body) into a frame value.
///
/// The line must be a JSON object; anything else is `Malformed` at the
/// relay boundary.
pub fn parse_frame(raw: &str) -> Result<Value, FrameError> {
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(FrameError::NotAnObject);
    }
    Ok(value)
}

/// Classify a frame by its members: `method` + `id` is a request,
/// `method` alone a notification, `id` alone a response.  A response
/// carrying both `result` and `error`, or neither, is malformed.
///
/// Request ids must be JSON strings or numbers.  A response may carry
/// `id: null` (the standard shape for errors not attributable to any
/// request); a method frame with a null id classifies as a notification.
pub fn classify(frame: &Value) -> Result<FrameKind, FrameError> {
    let obj = frame.as_object().ok_or(FrameError::NotAnObject)?;
    let has_method = obj.get("method").is_some_and(Value::is_string);
    let id = obj.get("id");

    if let Some(id) = id {
        if !(id.is_string() || id.is_number() || id.is_null()) {
            return Err(FrameError::BadId);
        }
    }

    let has_request_id = id.is_some_and(|id| !id.is_null());
    match (has_method, id.is_some()) {
        (true, _) if has_request_id => Ok(FrameKind::Request),
        (true, _) => Ok(FrameKind::Notification),
        (false, true) => {
            let has_result = obj.contains_key("result");
            let has_error = obj.contains_key("error");
            if has_result == has_error {
                return Err(FrameError::BadResponse);
            }
            Ok(FrameKind::Response)
        }
        (false, false) => Err(FrameError::Unclassifiable),
    }
}

/// Serialize a frame as a single LF-terminated line.
///
/// `serde_json` escapes embedded newlines inside strings, so the output is
/// always exactly one line.
pub fn encode_line(frame: &Value) -> String {
    let mut line = frame.to_string();
    line.push('\n');
    line
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

/// The frame's `method`, if it is a string.
pub fn method(frame: &Value) -> Option<&str> {
    frame.get("method").and_then(Value::as_str)
}

/// The frame's `id` member, untouched.
pub fn id(frame: &Value) -> Option<&Value> {
    frame.get("id")
}

/// The frame's `params` member.
pub fn params(frame: &Value) -> Option<&Value> {
    frame.get("params")
}

/// Return a copy of `frame` with its `id` replaced, preserving every other
/// top-level member.  Origin ids are restored on the return path with the
/// same call, so id round-trips are bit-exact.
pub fn with_id(frame: &Value, id: Value) -> Value {
    let mut copy = frame.clone();
    if let Some(obj) = copy.as_object_mut() {
        obj.insert("id".to_owned(), id);
    }
    copy
}

/// True when the response frame carries an `error` member.
pub fn is_error_response(frame: &Value) -> bool {
    frame.get("error").is_some()
}

// ---------------------------------------------------------------------------
// Frame constructors
// ---------------------------------------------------------------------------

/// Build a request frame.
pub fn request(id: Value, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a notification frame.
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Build a success response frame.
pub fn response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Build an error response frame from a taxonomy kind.
///
/// `id` is `Value::Null` for errors not attributable to a request.
pub fn error_response(id: Value, kind: ErrorKind, explanation: &str) -> Value {
    error_response_with_actions(id, kind, explanation, &[])
}

/// Like [`error_response`] but with `suggested_actions` in the data object.
pub fn error_response_with_actions(
    id: Value,
    kind: ErrorKind,
    explanation: &str,
    suggested_actions: &[&str],
) -> Value {
    let mut data = Map::new();
    data.insert("explanation".to_owned(), Value::String(explanation.to_owned()));
    if !suggested_actions.is_empty() {
        data.insert(
            "suggested_actions".to_owned(),
            Value::Array(
                suggested_actions
                    .iter()
                    .map(|a| Value::String((*a).to_owned()))
                    .collect(),
            ),
        );
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": kind.code(),
            "message": kind.message(),
            "data": Value::Object(data),
        },
    })
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Relay error kinds surfaced as JSON-RPC error objects.
///
/// Codes are frozen: clients and the inspection tooling match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigError,
    AgentLaunchFailed,
    ProtocolMismatch,
    SessionNotFound,
    SessionClosed,
    MethodNotAllowed,
    Malformed,
    ChannelClosed,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Stable JSON-RPC error code.
    pub fn code(self) -> i64 {
        match self {
            ErrorKind::Malformed => -32600,
            ErrorKind::Internal => -32603,
            ErrorKind::SessionNotFound => -32001,
            ErrorKind::SessionClosed => -32002,
            ErrorKind::MethodNotAllowed => -32003,
            ErrorKind::AgentLaunchFailed => -32010,
            ErrorKind::ProtocolMismatch => -32011,
            ErrorKind::ChannelClosed => -32012,
            ErrorKind::Timeout => -32013,
            ErrorKind::ConfigError => -32020,
        }
    }

    /// Human-readable `message` member for the error object.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::ConfigError => "configuration error",
            ErrorKind::AgentLaunchFailed => "agent launch failed",
            ErrorKind::ProtocolMismatch => "agent protocol version mismatch",
            ErrorKind::SessionNotFound => "session not found",
            ErrorKind::SessionClosed => "session closed",
            ErrorKind::MethodNotAllowed => "method not allowed in this session state",
            ErrorKind::Malformed => "malformed frame",
            ErrorKind::ChannelClosed => "client channel closed",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Internal => "internal relay error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_covers_the_three_shapes() {
        let req = json!({"jsonrpc": "2.0", "id": 1, "method": "session/prompt", "params": {}});
        let note = json!({"jsonrpc": "2.0", "method": "session/update", "params": {}});
        let resp = json!({"jsonrpc": "2.0", "id": "p1", "result": {}});

        assert_eq!(classify(&req).unwrap(), FrameKind::Request);
        assert_eq!(classify(&note).unwrap(), FrameKind::Notification);
        assert_eq!(classify(&resp).unwrap(), FrameKind::Response);
    }

    #[test]
    fn classify_rejects_result_and_error_together() {
        let both = json!({"id": 1, "result": {}, "error": {"code": -1, "message": "x"}});
        let neither = json!({"id": 1});
        assert!(matches!(classify(&both), Err(FrameError::BadResponse)));
        assert!(matches!(classify(&neither), Err(FrameError::BadResponse)));
    }

    #[test]
    fn classify_rejects_non_scalar_ids() {
        let frame = json!({"id": [1], "method": "session/prompt"});
        assert!(matches!(classify(&frame), Err(FrameError::BadId)));
    }

    #[test]
    fn with_id_preserves_unknown_members() {
        let frame = json!({"jsonrpc": "2.0", "id": 7, "method": "m", "x-extra": true});
        let rewritten = with_id(&frame, json!("p1"));
        assert_eq!(rewritten["id"], json!("p1"));
        assert_eq!(rewritten["x-extra"], json!(true));
        assert_eq!(rewritten["method"], json!("m"));
    }

    #[test]
    fn encode_line_is_single_line_even_with_embedded_newlines() {
        let frame = json!({"id": 1, "method": "m", "params": {"text": "a\nb"}});
        let line = encode_line(&frame);
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
        let reparsed = parse_frame(line.trim_end()).unwrap();
        assert_eq!(reparsed["params"]["text"], json!("a\nb"));
    }
}
