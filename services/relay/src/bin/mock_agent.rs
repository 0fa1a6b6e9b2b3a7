// mock-agent: Scripted stdio ACP agent for the relay test suites.
//
// Usage: mock-agent [scenario] [session-id]
//
// Scenarios:
//   echo (default)   session/prompt answered immediately with a stopReason
//   stream           two agent_message_chunk updates, then the response
//   permission       chunk, session/request_permission (id "p1"), wait for
//                    the reply, then the response
//   crash-mid-turn   two chunks then exit(1) without the prompt response
//   decline-session  session/new answered with an error so the relay keeps
//                    its own session id
//
// Speaks one JSON object per LF-terminated line, like any ACP agent.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let scenario = std::env::args().nth(1).unwrap_or_else(|| "echo".to_owned());
    let session_id = std::env::args()
        .nth(2)
        .unwrap_or_else(|| format!("mock_sess_{}", std::process::id()));

    eprintln!("mock-agent starting (scenario: {scenario})");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let frame: Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("mock-agent: unparseable line: {e}");
                continue;
            }
        };
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        let id = frame.get("id").cloned();

        match (method.as_deref(), id) {
            (Some("initialize"), Some(id)) => {
                write_frame(
                    &mut stdout,
                    &json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": 1,
                            "serverInfo": { "name": "mock-agent", "version": "0.1.0" },
                            "capabilities": {}
                        }
                    }),
                )
                .await;
            }
            (Some("session/new"), Some(id)) => {
                if scenario == "decline-session" {
                    write_frame(
                        &mut stdout,
                        &json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": { "code": -32601, "message": "method not found" }
                        }),
                    )
                    .await;
                } else {
                    write_frame(
                        &mut stdout,
                        &json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": { "sessionId": session_id }
                        }),
                    )
                    .await;
                }
            }
            (Some("session/prompt"), Some(id)) => {
                run_prompt(&scenario, &session_id, id, &mut stdout, &mut lines).await;
            }
            (Some(_), Some(id)) => {
                // Echo back other requests, like the reference agent.
                write_frame(
                    &mut stdout,
                    &json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "echo": frame }
                    }),
                )
                .await;
            }
            _ => {
                // Notifications and stray responses are ignored.
            }
        }
    }
}

async fn run_prompt(
    scenario: &str,
    session_id: &str,
    prompt_id: Value,
    stdout: &mut tokio::io::Stdout,
    lines: &mut Lines<BufReader<Stdin>>,
) {
    match scenario {
        "stream" => {
            send_chunk(stdout, session_id, "Hel").await;
            send_chunk(stdout, session_id, "lo").await;
            send_stop(stdout, prompt_id).await;
        }
        "permission" => {
            send_chunk(stdout, session_id, "Working").await;
            write_frame(
                stdout,
                &json!({
                    "jsonrpc": "2.0",
                    "id": "p1",
                    "method": "session/request_permission",
                    "params": {
                        "sessionId": session_id,
                        "toolCall": { "toolCallId": "tool_1", "rawInput": { "path": "test.txt" } },
                        "options": [
                            { "optionId": "allow", "name": "Allow" },
                            { "optionId": "deny", "name": "Deny" }
                        ]
                    }
                }),
            )
            .await;

            // Block the turn on the client's decision, relayed back with
            // our original id.
            let option_id = wait_for_permission_reply(lines).await;
            send_chunk(stdout, session_id, &format!("decision:{option_id}")).await;
            send_stop(stdout, prompt_id).await;
        }
        "crash-mid-turn" => {
            send_chunk(stdout, session_id, "chunk-one").await;
            send_chunk(stdout, session_id, "chunk-two").await;
            let _ = stdout.flush().await;
            std::process::exit(1);
        }
        _ => {
            send_stop(stdout, prompt_id).await;
        }
    }
}

async fn wait_for_permission_reply(lines: &mut Lines<BufReader<Stdin>>) -> String {
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(frame) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        if frame.get("id").and_then(Value::as_str) == Some("p1") {
            return frame
                .pointer("/result/outcome/optionId")
                .and_then(Value::as_str)
                .unwrap_or("none")
                .to_owned();
        }
    }
    "disconnected".to_owned()
}

async fn send_chunk(stdout: &mut tokio::io::Stdout, session_id: &str, text: &str) {
    write_frame(
        stdout,
        &json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": {
                "sessionId": session_id,
                "update": {
                    "sessionUpdate": "agent_message_chunk",
                    "content": { "type": "text", "text": text }
                }
            }
        }),
    )
    .await;
}

async fn send_stop(stdout: &mut tokio::io::Stdout, prompt_id: Value) {
    write_frame(
        stdout,
        &json!({
            "jsonrpc": "2.0",
            "id": prompt_id,
            "result": { "stopReason": "end_turn" }
        }),
    )
    .await;
}

async fn write_frame(stdout: &mut tokio::io::Stdout, frame: &Value) {
    let mut line = frame.to_string();
    line.push('\n');
    if stdout.write_all(line.as_bytes()).await.is_err() {
        std::process::exit(0);
    }
    let _ = stdout.flush().await;
}
