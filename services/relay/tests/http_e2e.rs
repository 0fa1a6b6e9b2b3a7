/// End-to-end HTTP one-shot scenarios plus the health surface.
use relay::agent::{AgentLauncher, DirectLauncher};
use relay::config::WorkingDirPolicy;
use relay::registry::SessionRegistry;
use relay::storage::journal::Journal;
use relay::storage::SharedJournal;
use relay::AppState;
use relay_test_utils::frames;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

struct HttpHarness {
    rpc_url: String,
    health_url: String,
    journal: SharedJournal,
    dir: TempDir,
}

impl HttpHarness {
    fn working_dir(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }
}

async fn start_relay(scenario: &str) -> HttpHarness {
    let dir = TempDir::new().unwrap();
    let journal: SharedJournal = Arc::new(Mutex::new(
        Journal::open(&dir.path().join("journal.db")).unwrap(),
    ));
    let launcher: Arc<dyn AgentLauncher> = Arc::new(DirectLauncher::new(vec![
        env!("CARGO_BIN_EXE_mock-agent").to_owned(),
        scenario.to_owned(),
    ]));
    let registry = Arc::new(SessionRegistry::new(
        launcher.clone(),
        journal.clone(),
        acp_protocol::PROTOCOL_VERSION,
        WorkingDirPolicy::PassThrough,
    ));
    let state = AppState::new(registry, journal.clone(), launcher.command_label());

    let rpc_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rpc_addr = rpc_listener.local_addr().unwrap();
    let health_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let health_addr = health_listener.local_addr().unwrap();

    let rpc_state = state.clone();
    tokio::spawn(async move {
        axum::serve(rpc_listener, relay::build_http_router(rpc_state)).await.unwrap();
    });
    tokio::spawn(async move {
        axum::serve(health_listener, relay::build_health_router(state)).await.unwrap();
    });

    HttpHarness {
        rpc_url: format!("http://{rpc_addr}"),
        health_url: format!("http://{health_addr}"),
        journal,
        dir,
    }
}

async fn post_rpc(url: &str, frame: &Value) -> Value {
    reqwest::Client::new()
        .post(url)
        .json(frame)
        .send()
        .await
        .expect("http response")
        .json()
        .await
        .expect("json body")
}

// ---------------------------------------------------------------------------
// S1: hello-world prompt over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hello_world_over_http_returns_only_the_response() {
    let h = start_relay("stream").await;

    // The original clients POST to method-named paths; the relay keys on
    // the body's method.
    let created = post_rpc(
        &format!("{}/session/new", h.rpc_url),
        &frames::session_new(1, &h.working_dir()),
    )
    .await;
    assert_eq!(created["id"], json!(1));
    let session_id = created["result"]["sessionId"].as_str().unwrap().to_owned();

    let reply = post_rpc(
        &format!("{}/session/prompt", h.rpc_url),
        &frames::session_prompt(2, &session_id, "Hello"),
    )
    .await;
    assert_eq!(reply["id"], json!(2));
    assert_eq!(reply["result"]["stopReason"], json!("end_turn"));
    // No notification frames leak into the one-shot body.
    assert!(reply.get("method").is_none());

    // The intermediate session/update notifications were journaled even
    // though this transport never returned them.
    let journal = h.journal.lock().await;
    let rows = journal.messages_after(&session_id, 0).unwrap();
    assert!(rows
        .iter()
        .any(|r| r.method.as_deref() == Some("session/update") && r.direction == "relay_to_client"));
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_request_frames_are_rejected_over_http() {
    let h = start_relay("echo").await;

    let notification = json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": { "sessionId": "sess_x" }
    });
    let reply = post_rpc(&h.rpc_url, &notification).await;
    assert_eq!(reply["error"]["code"], json!(-32003));
}

#[tokio::test]
async fn prompt_against_unknown_session_is_not_found() {
    let h = start_relay("echo").await;
    let reply = post_rpc(
        &h.rpc_url,
        &frames::session_prompt(2, "sess_never_created", "hi"),
    )
    .await;
    assert_eq!(reply["error"]["code"], json!(-32001));
    assert!(reply["error"]["data"]["explanation"].is_string());
}

#[tokio::test]
async fn resume_after_close_is_session_closed_over_http() {
    let h = start_relay("echo").await;

    let created = post_rpc(&h.rpc_url, &frames::session_new(1, &h.working_dir())).await;
    let session_id = created["result"]["sessionId"].as_str().unwrap().to_owned();

    let closed = post_rpc(&h.rpc_url, &frames::session_close(3, &session_id)).await;
    assert!(closed.get("error").is_none());

    let resumed = post_rpc(&h.rpc_url, &frames::session_resume(4, &session_id)).await;
    assert_eq!(resumed["error"]["code"], json!(-32002));
    assert_eq!(
        resumed["error"]["data"]["suggested_actions"][0],
        json!("create a new session with session/new")
    );
}

// ---------------------------------------------------------------------------
// Health surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_agent_command_and_session_count() {
    let h = start_relay("echo").await;

    let before: Value = reqwest::get(format!("{}/api/health", h.health_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["status"], json!("ok"));
    assert!(before["agent_command"].as_str().unwrap().contains("mock-agent"));
    assert_eq!(before["live_sessions"], json!(0));
    assert!(before["uptime_seconds"].is_u64());

    let _created = post_rpc(&h.rpc_url, &frames::session_new(1, &h.working_dir())).await;

    let after: Value = reqwest::get(format!("{}/api/health", h.health_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["live_sessions"], json!(1));
}
