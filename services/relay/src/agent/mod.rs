//! Agent child processes and the launcher seam.
//!
//! A launcher turns a session working directory into a running agent child
//! speaking newline-delimited JSON-RPC over stdio.  The router never learns
//! which launcher produced the child: direct and container agents expose
//! the same [`AgentHandle`].
//!
//! Lifecycle: `Spawned -> Initializing -> Ready -> Terminating -> Exited`.
//! Only a `Ready` handle accepts non-initialize frames; `Ready` is signaled
//! by [`AgentHandle::initialize`] completing the handshake.

use crate::storage::journal::{Direction, JournalError};
use crate::storage::SharedJournal;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

pub mod container;
pub mod direct;

pub use container::ContainerLauncher;
pub use direct::DirectLauncher;

/// How long the initialize handshake may take before the child is killed.
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Frames queued toward the agent's stdin.  Bounded so a flood of client
/// requests backpressures the clients, never the agent-out pump.
const STDIN_QUEUE_CAPACITY: usize = 64;

/// Frames read off the agent's stdout awaiting the session pump.
const EVENT_QUEUE_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Errors and events
// ---------------------------------------------------------------------------

/// Error type for agent lifecycle and I/O.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("agent stdio unavailable: {0}")]
    Stdio(&'static str),
    #[error("agent stdin closed")]
    StdinClosed,
    #[error("agent exited before becoming ready (exit code {code:?})")]
    ExitedDuringStartup { code: Option<i32> },
    #[error("{method} timed out after {elapsed:?}")]
    HandshakeTimeout {
        method: &'static str,
        elapsed: Duration,
    },
    #[error("initialize failed: {0}")]
    InitializeFailed(String),
    #[error("agent protocol version {agent} incompatible with relay version {relay}")]
    ProtocolMismatch { agent: i64, relay: i64 },
    #[error("journal: {0}")]
    Journal(#[from] JournalError),
}

/// What the agent-out reader surfaces to the session pump.
#[derive(Debug)]
pub enum AgentEvent {
    /// A parsed frame (already journaled `agent_to_relay`).
    Frame(Value),
    /// A stdout line that failed codec validation; the session must reset.
    Malformed(String),
    /// The child exited; no further events follow.
    Exited(Option<i32>),
}

// ---------------------------------------------------------------------------
// Launcher seam
// ---------------------------------------------------------------------------

/// Factory yielding a running agent child for a session.
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    /// Spawn the agent with its stdio plumbed, stderr drained to the
    /// journal under `session_id`.  The returned handle has NOT completed
    /// the initialize handshake.
    async fn launch(
        &self,
        session_id: &str,
        working_dir: &Path,
        journal: SharedJournal,
    ) -> Result<AgentHandle, AgentError>;

    /// Identifier shown on the health surface.
    fn command_label(&self) -> String;
}

// ---------------------------------------------------------------------------
// AgentHandle
// ---------------------------------------------------------------------------

/// One running agent child: serialized stdin writes, a stream of decoded
/// stdout frames, and kill/wait lifecycle.
pub struct AgentHandle {
    command_label: String,
    /// Journal key for frames on the agent link.  Swapped when the agent
    /// allocates its own session id.
    session_key: Arc<StdMutex<String>>,
    journal: SharedJournal,
    writer: mpsc::Sender<String>,
    events: Option<mpsc::Receiver<AgentEvent>>,
    child: Arc<Mutex<Option<Child>>>,
    tasks: Vec<JoinHandle<()>>,
    /// Relay -> agent outgoing id counter (ids are JSON numbers).
    next_id: AtomicU64,
    ready: bool,
    negotiated_version: Option<i64>,
    capabilities: Value,
    /// Set for containerized agents; forced down on shutdown.
    container_name: Option<String>,
}

impl AgentHandle {
    /// Wire up the writer/reader/stderr tasks around a freshly spawned
    /// child.
    pub(crate) fn from_child(
        mut child: Child,
        command_label: String,
        session_id: &str,
        journal: SharedJournal,
        container_name: Option<String>,
    ) -> Result<Self, AgentError> {
        let stdin = child.stdin.take().ok_or(AgentError::Stdio("stdin"))?;
        let stdout = child.stdout.take().ok_or(AgentError::Stdio("stdout"))?;
        let stderr = child.stderr.take();

        let session_key = Arc::new(StdMutex::new(session_id.to_owned()));
        let child = Arc::new(Mutex::new(Some(child)));

        let (writer_tx, writer_rx) = mpsc::channel(STDIN_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let mut tasks = vec![
            tokio::spawn(writer_task(stdin, writer_rx)),
            tokio::spawn(reader_task(
                stdout,
                event_tx,
                journal.clone(),
                session_key.clone(),
                child.clone(),
            )),
        ];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(
                stderr,
                journal.clone(),
                session_key.clone(),
            )));
        }

        Ok(AgentHandle {
            command_label,
            session_key,
            journal,
            writer: writer_tx,
            events: Some(event_rx),
            child,
            tasks,
            next_id: AtomicU64::new(0),
            ready: false,
            negotiated_version: None,
            capabilities: Value::Null,
            container_name,
        })
    }

    /// Allocate the next relay -> agent request id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Journal a frame `relay_to_agent` and queue it for the child's stdin.
    ///
    /// Blocks when the stdin queue is full (strict agent-direction
    /// backpressure).  The journal append commits before the frame can
    /// reach the child.
    pub async fn send(&self, frame: &Value) -> Result<(), AgentError> {
        let session = self.session_key.lock().expect("session key lock").clone();
        {
            let mut journal = self.journal.lock().await;
            journal.append_frame(&session, Direction::RelayToAgent, frame)?;
        }
        self.writer
            .send(acp_protocol::encode_line(frame))
            .await
            .map_err(|_| AgentError::StdinClosed)
    }

    /// Run the `initialize` handshake.  On success the handle is `Ready`;
    /// on any failure the child is killed and the error returned.
    pub async fn initialize(&mut self, protocol_version: i64) -> Result<(), AgentError> {
        let result = self.initialize_inner(protocol_version).await;
        if result.is_err() {
            self.shutdown().await;
        }
        result
    }

    async fn initialize_inner(&mut self, protocol_version: i64) -> Result<(), AgentError> {
        let id = self.next_request_id();
        let frame = acp_protocol::request(
            json!(id),
            acp_protocol::methods::INITIALIZE,
            json!({
                "protocolVersion": protocol_version,
                "capabilities": { "permissions": true },
            }),
        );
        self.send(&frame).await?;

        let response = self
            .await_response(id, INITIALIZE_TIMEOUT, acp_protocol::methods::INITIALIZE)
            .await?;

        if let Some(error) = response.get("error") {
            return Err(AgentError::InitializeFailed(error.to_string()));
        }
        let result = response.get("result").cloned().unwrap_or(Value::Null);
        let agent_version = result
            .get("protocolVersion")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                AgentError::InitializeFailed("response missing protocolVersion".to_owned())
            })?;
        if agent_version != protocol_version {
            return Err(AgentError::ProtocolMismatch {
                agent: agent_version,
                relay: protocol_version,
            });
        }

        self.negotiated_version = Some(agent_version);
        self.capabilities = result.get("capabilities").cloned().unwrap_or(Value::Null);
        self.ready = true;
        Ok(())
    }

    /// Forward ACP `session/new` to the agent and return the session id it
    /// allocated, if any.  Agents that do not service the method (error
    /// response) keep the relay-generated id.
    pub async fn open_agent_session(
        &mut self,
        working_dir: &Path,
    ) -> Result<Option<String>, AgentError> {
        let id = self.next_request_id();
        let frame = acp_protocol::request(
            json!(id),
            acp_protocol::methods::SESSION_NEW,
            json!({
                "cwd": working_dir.to_string_lossy(),
                "mcpServers": {},
            }),
        );
        self.send(&frame).await?;

        let response = self
            .await_response(id, INITIALIZE_TIMEOUT, acp_protocol::methods::SESSION_NEW)
            .await?;
        if response.get("error").is_some() {
            return Ok(None);
        }
        Ok(response
            .get("result")
            .and_then(|r| r.get("sessionId"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned))
    }

    /// Adopt a new journal key after the agent allocated the session id.
    pub fn rebind_session(&self, session_id: &str) {
        *self.session_key.lock().expect("session key lock") = session_id.to_owned();
    }

    /// Read events until the response with `id` arrives.  Notifications
    /// emitted during startup are journaled by the reader and dropped here.
    async fn await_response(
        &mut self,
        id: u64,
        limit: Duration,
        method: &'static str,
    ) -> Result<Value, AgentError> {
        let events = self.events.as_mut().ok_or(AgentError::StdinClosed)?;
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = timeout(remaining, events.recv())
                .await
                .map_err(|_| AgentError::HandshakeTimeout {
                    method,
                    elapsed: limit,
                })?;
            match event {
                Some(AgentEvent::Frame(frame)) => {
                    let is_match = matches!(
                        acp_protocol::classify(&frame),
                        Ok(acp_protocol::FrameKind::Response)
                    ) && acp_protocol::id(&frame).and_then(Value::as_u64) == Some(id);
                    if is_match {
                        return Ok(frame);
                    }
                    debug!(method, "ignoring frame during handshake");
                }
                Some(AgentEvent::Malformed(line)) => {
                    return Err(AgentError::InitializeFailed(format!(
                        "malformed agent frame during handshake: {line}"
                    )));
                }
                Some(AgentEvent::Exited(code)) => {
                    return Err(AgentError::ExitedDuringStartup { code });
                }
                None => {
                    return Err(AgentError::ExitedDuringStartup { code: None });
                }
            }
        }
    }

    /// Hand the event stream to the session pump.  Callable once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.events.take()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn negotiated_version(&self) -> Option<i64> {
        self.negotiated_version
    }

    pub fn capabilities(&self) -> &Value {
        &self.capabilities
    }

    pub fn command_label(&self) -> &str {
        &self.command_label
    }

    /// Kill the child and reap it.  For containerized agents the container
    /// is also force-removed; orphan containers are a correctness bug.
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        if let Some(name) = &self.container_name {
            let _ = Command::new("docker")
                .args(["rm", "-f", name])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await;
        }
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn helper
// ---------------------------------------------------------------------------

/// Spawn with a short retry loop for transiently busy executables.
pub(crate) async fn spawn_with_retry(
    command: &mut Command,
    label: &str,
) -> Result<Child, AgentError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(AgentError::Spawn {
                    command: label.to_owned(),
                    source,
                });
            }
        }
    }
    unreachable!("spawn loop returns before exhausting retries")
}

// ---------------------------------------------------------------------------
// Child I/O tasks
// ---------------------------------------------------------------------------

async fn writer_task(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        if stdin.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn reader_task(
    stdout: ChildStdout,
    events: mpsc::Sender<AgentEvent>,
    journal: SharedJournal,
    session_key: Arc<StdMutex<String>>,
    child: Arc<Mutex<Option<Child>>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let session = session_key.lock().expect("session key lock").clone();
        match acp_protocol::parse_frame(&line) {
            Ok(frame) => {
                {
                    let mut journal = journal.lock().await;
                    if let Err(e) = journal.append_frame(&session, Direction::AgentToRelay, &frame)
                    {
                        warn!(error = %e, "journal append failed; dropping agent frame");
                        continue;
                    }
                }
                if events.send(AgentEvent::Frame(frame)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "malformed frame on agent stdout");
                {
                    let mut journal = journal.lock().await;
                    let _ = journal.append_malformed(&session, Direction::AgentToRelay, &line);
                }
                let _ = events.send(AgentEvent::Malformed(line)).await;
                break;
            }
        }
    }

    // Reap the child (unless shutdown already did) and tell the pump.
    let code = match child.lock().await.take() {
        Some(mut child) => child.wait().await.ok().and_then(|s| s.code()),
        None => None,
    };
    let _ = events.send(AgentEvent::Exited(code)).await;
}

async fn stderr_task(
    stderr: ChildStderr,
    journal: SharedJournal,
    session_key: Arc<StdMutex<String>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(line = %line, "agent stderr");
        let session = session_key.lock().expect("session key lock").clone();
        let mut journal = journal.lock().await;
        let _ = journal.append_stderr(&session, &line);
    }
}
