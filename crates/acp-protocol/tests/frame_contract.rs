/// Contract tests for the frame codec: literal frames from the ACP wire
/// format, classified and round-tripped.
use acp_protocol::{classify, encode_line, parse_frame, with_id, ErrorKind, FrameKind};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Classification against literal wire frames
// ---------------------------------------------------------------------------

#[test]
fn session_new_request_classifies_as_request() {
    let frame = parse_frame(
        r#"{"jsonrpc":"2.0","method":"session/new","params":{"workingDirectory":"/tmp"},"id":1}"#,
    )
    .unwrap();
    assert_eq!(classify(&frame).unwrap(), FrameKind::Request);
    assert_eq!(acp_protocol::method(&frame), Some("session/new"));
    assert_eq!(acp_protocol::id(&frame), Some(&json!(1)));
}

#[test]
fn session_update_classifies_as_notification() {
    let frame = parse_frame(
        r#"{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"S","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"Hi"}}}}"#,
    )
    .unwrap();
    assert_eq!(classify(&frame).unwrap(), FrameKind::Notification);
}

#[test]
fn permission_reply_classifies_as_response() {
    let frame = parse_frame(
        r#"{"jsonrpc":"2.0","id":3,"result":{"outcome":{"outcome":"selected","optionId":"allow"}}}"#,
    )
    .unwrap();
    assert_eq!(classify(&frame).unwrap(), FrameKind::Response);
    assert!(!acp_protocol::is_error_response(&frame));
}

#[test]
fn string_ids_survive_rewriting_bit_exact() {
    // The agent chose "p1"; the relay rewrites to its counter and must
    // restore "p1" on the way back.
    let reverse = parse_frame(
        r#"{"jsonrpc":"2.0","id":"p1","method":"session/request_permission","params":{"sessionId":"S","toolCall":{"toolCallId":"t1","rawInput":{}},"options":[{"optionId":"allow"}]}}"#,
    )
    .unwrap();
    let outgoing = with_id(&reverse, json!(42));
    assert_eq!(outgoing["id"], json!(42));

    let client_reply = json!({"jsonrpc": "2.0", "id": 42, "result": {"outcome": {"outcome": "selected", "optionId": "allow"}}});
    let restored = with_id(&client_reply, reverse["id"].clone());
    assert_eq!(restored["id"], Value::String("p1".to_owned()));
}

// ---------------------------------------------------------------------------
// Malformed frames
// ---------------------------------------------------------------------------

#[test]
fn non_object_lines_are_rejected() {
    assert!(parse_frame("[1,2,3]").is_err());
    assert!(parse_frame("\"hello\"").is_err());
    assert!(parse_frame("not json at all").is_err());
}

#[test]
fn frame_with_neither_method_nor_id_is_rejected() {
    let frame = parse_frame(r#"{"jsonrpc":"2.0","params":{}}"#).unwrap();
    assert!(classify(&frame).is_err());
}

#[test]
fn null_id_error_response_classifies_as_response() {
    // The standard shape for an error not attributable to any request.
    let frame = parse_frame(
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"malformed frame"}}"#,
    )
    .unwrap();
    assert_eq!(classify(&frame).unwrap(), FrameKind::Response);
}

#[test]
fn method_frame_with_null_id_is_a_notification() {
    let frame = parse_frame(r#"{"jsonrpc":"2.0","id":null,"method":"session/update"}"#).unwrap();
    assert_eq!(classify(&frame).unwrap(), FrameKind::Notification);
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn codec_round_trip_is_value_equal() {
    let raw = r#"{"jsonrpc":"2.0","id":2,"method":"session/prompt","params":{"sessionId":"S","content":[{"type":"text","text":"Hello"}]},"vendorExtension":{"keep":"me"}}"#;
    let first = parse_frame(raw).unwrap();
    let reencoded = encode_line(&first);
    let second = parse_frame(reencoded.trim_end()).unwrap();
    assert_eq!(first, second);
    // Unknown top-level members must not be stripped.
    assert_eq!(second["vendorExtension"]["keep"], json!("me"));
}

// ---------------------------------------------------------------------------
// Error objects
// ---------------------------------------------------------------------------

#[test]
fn error_response_carries_stable_code_and_data() {
    let frame = acp_protocol::error_response_with_actions(
        json!(9),
        ErrorKind::SessionClosed,
        "session sess_1 was closed",
        &["create a new session with session/new"],
    );
    assert_eq!(frame["id"], json!(9));
    assert_eq!(frame["error"]["code"], json!(-32002));
    assert_eq!(
        frame["error"]["data"]["explanation"],
        json!("session sess_1 was closed")
    );
    assert_eq!(
        frame["error"]["data"]["suggested_actions"][0],
        json!("create a new session with session/new")
    );
}

#[test]
fn error_codes_are_distinct() {
    let kinds = [
        ErrorKind::ConfigError,
        ErrorKind::AgentLaunchFailed,
        ErrorKind::ProtocolMismatch,
        ErrorKind::SessionNotFound,
        ErrorKind::SessionClosed,
        ErrorKind::MethodNotAllowed,
        ErrorKind::Malformed,
        ErrorKind::ChannelClosed,
        ErrorKind::Timeout,
        ErrorKind::Internal,
    ];
    let mut codes: Vec<i64> = kinds.iter().map(|k| k.code()).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), kinds.len());
}
