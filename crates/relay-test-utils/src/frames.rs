//! Builders for the client-boundary frames used across the test suites.

use acp_protocol::methods;
use serde_json::{json, Value};

pub fn session_new(id: u64, working_directory: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": methods::SESSION_NEW,
        "params": { "workingDirectory": working_directory },
        "id": id
    })
}

pub fn session_resume(id: u64, session_id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": methods::SESSION_RESUME,
        "params": { "sessionId": session_id },
        "id": id
    })
}

pub fn session_close(id: u64, session_id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": methods::SESSION_CLOSE,
        "params": { "sessionId": session_id },
        "id": id
    })
}

pub fn session_prompt(id: u64, session_id: &str, text: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": methods::SESSION_PROMPT,
        "params": {
            "sessionId": session_id,
            "content": [ { "type": "text", "text": text } ]
        },
        "id": id
    })
}

/// A client's answer to a `session/request_permission` reverse request.
/// `id` is the relay-assigned id the reverse request arrived with.
pub fn permission_reply(id: &Value, option_id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "outcome": { "outcome": "selected", "optionId": option_id } }
    })
}

/// Extract the concatenated `agent_message_chunk` text from a stream of
/// frames.
pub fn concat_chunks(frames: &[Value]) -> String {
    frames
        .iter()
        .filter(|f| f.get("method").and_then(Value::as_str) == Some(methods::SESSION_UPDATE))
        .filter_map(|f| {
            let update = f.pointer("/params/update")?;
            if update.get("sessionUpdate")?.as_str()? != "agent_message_chunk" {
                return None;
            }
            update.pointer("/content/text")?.as_str().map(ToOwned::to_owned)
        })
        .collect()
}
