/// Tests for journal durability and the session/message tables.
///
/// Validates:
/// - Session rows open with closed_at unset and close exactly once
/// - Appends preserve total order and survive re-open
/// - messages_after returns the tail strictly past the cursor
/// - Adopting an agent-allocated id rewrites existing rows
use relay::storage::journal::{Direction, Journal};
use serde_json::json;
use tempfile::NamedTempFile;

fn make_journal() -> (Journal, NamedTempFile) {
    let f = NamedTempFile::new().unwrap();
    let j = Journal::open(f.path()).unwrap();
    (j, f)
}

// ---------------------------------------------------------------------------
// Session rows
// ---------------------------------------------------------------------------

#[test]
fn session_row_opens_unclosed_and_closes_once() {
    let (mut j, _f) = make_journal();
    j.create_session("sess_a", "/tmp/work").unwrap();

    let row = j.session_row("sess_a").unwrap().expect("row exists");
    assert_eq!(row.working_directory, "/tmp/work");
    assert!(row.closed_at.is_none());

    j.close_session("sess_a").unwrap();
    let closed = j.session_row("sess_a").unwrap().unwrap();
    let first_close = closed.closed_at.clone().expect("closed_at set");

    // A second close keeps the first timestamp.
    j.close_session("sess_a").unwrap();
    let again = j.session_row("sess_a").unwrap().unwrap();
    assert_eq!(again.closed_at.as_deref(), Some(first_close.as_str()));
}

#[test]
fn closing_an_unknown_session_is_an_error() {
    let (mut j, _f) = make_journal();
    assert!(j.close_session("sess_missing").is_err());
}

// ---------------------------------------------------------------------------
// Message appends
// ---------------------------------------------------------------------------

#[test]
fn appends_are_totally_ordered_and_classified() {
    let (mut j, _f) = make_journal();
    j.create_session("sess_b", "/tmp").unwrap();

    let req = json!({"jsonrpc": "2.0", "id": 1, "method": "session/prompt", "params": {}});
    let note = json!({"jsonrpc": "2.0", "method": "session/update", "params": {}});
    let resp = json!({"jsonrpc": "2.0", "id": 1, "result": {"stopReason": "end_turn"}});

    let s1 = j.append_frame("sess_b", Direction::ClientToRelay, &req).unwrap();
    let s2 = j.append_frame("sess_b", Direction::RelayToAgent, &req).unwrap();
    let s3 = j.append_frame("sess_b", Direction::AgentToRelay, &note).unwrap();
    let s4 = j.append_frame("sess_b", Direction::RelayToClient, &resp).unwrap();
    assert!(s1 < s2 && s2 < s3 && s3 < s4, "sequence must grow");

    let rows = j.messages_after("sess_b", 0).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].direction, "client_to_relay");
    assert_eq!(rows[0].message_type, "request");
    assert_eq!(rows[0].method.as_deref(), Some("session/prompt"));
    assert_eq!(rows[0].jsonrpc_id.as_deref(), Some("1"));
    assert_eq!(rows[2].message_type, "notification");
    assert!(rows[2].jsonrpc_id.is_none());
    assert_eq!(rows[3].message_type, "response");
}

#[test]
fn messages_after_returns_strictly_past_the_cursor() {
    let (mut j, _f) = make_journal();
    j.create_session("sess_c", "/tmp").unwrap();

    let note = json!({"jsonrpc": "2.0", "method": "session/update", "params": {}});
    let mut seqs = Vec::new();
    for _ in 0..5 {
        seqs.push(j.append_frame("sess_c", Direction::RelayToClient, &note).unwrap());
    }

    let tail = j.messages_after("sess_c", seqs[2]).unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].seq, seqs[3]);
    assert_eq!(tail[1].seq, seqs[4]);
    assert!(j.messages_after("sess_c", seqs[4]).unwrap().is_empty());
}

#[test]
fn raw_bytes_round_trip_through_the_journal() {
    let (mut j, _f) = make_journal();
    j.create_session("sess_d", "/tmp").unwrap();

    let frame = json!({"jsonrpc": "2.0", "id": "p1", "method": "session/request_permission",
        "params": {"text": "line one\nline two"}});
    j.append_frame("sess_d", Direction::RelayToClient, &frame).unwrap();

    let rows = j.messages_after("sess_d", 0).unwrap();
    let reparsed: serde_json::Value = serde_json::from_slice(&rows[0].raw_message).unwrap();
    assert_eq!(reparsed, frame);
    assert_eq!(rows[0].jsonrpc_id.as_deref(), Some("\"p1\""));
}

#[test]
fn stderr_and_malformed_records_are_out_of_band() {
    let (mut j, _f) = make_journal();
    j.create_session("sess_e", "/tmp").unwrap();

    j.append_stderr("sess_e", "agent panicked: oh no").unwrap();
    j.append_malformed("sess_e", Direction::AgentToRelay, "{not json").unwrap();

    let rows = j.messages_after("sess_e", 0).unwrap();
    assert_eq!(rows[0].message_type, "stderr");
    assert_eq!(rows[1].message_type, "malformed");
    assert_eq!(rows[1].raw_message, b"{not json");
}

// ---------------------------------------------------------------------------
// Durability and rename
// ---------------------------------------------------------------------------

#[test]
fn journal_survives_reopen() {
    let f = NamedTempFile::new().unwrap();
    {
        let mut j = Journal::open(f.path()).unwrap();
        j.create_session("sess_f", "/tmp").unwrap();
        j.append_frame(
            "sess_f",
            Direction::ClientToRelay,
            &json!({"id": 1, "method": "session/new"}),
        )
        .unwrap();
    }

    let j = Journal::open(f.path()).unwrap();
    assert!(j.session_row("sess_f").unwrap().is_some());
    assert_eq!(j.message_count("sess_f").unwrap(), 1);
}

#[test]
fn rename_session_moves_row_and_messages() {
    let (mut j, _f) = make_journal();
    j.create_session("sess_tmp", "/tmp").unwrap();
    j.append_frame(
        "sess_tmp",
        Direction::RelayToAgent,
        &json!({"id": 1, "method": "initialize"}),
    )
    .unwrap();

    j.rename_session("sess_tmp", "mock_sess_42").unwrap();

    assert!(j.session_row("sess_tmp").unwrap().is_none());
    assert!(j.session_row("mock_sess_42").unwrap().is_some());
    assert_eq!(j.message_count("sess_tmp").unwrap(), 0);
    assert_eq!(j.message_count("mock_sess_42").unwrap(), 1);
}
