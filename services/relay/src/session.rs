//! One session: an agent child bound to any number of client channels by
//! the bidirectional JSON-RPC router.
//!
//! # Pumps
//! - The **agent-out pump** ([`Session::run`]) is the single reader of the
//!   agent's stdout stream.  It matches responses to the client that asked,
//!   routes reverse requests to exactly one client, and fans notifications
//!   out to every attached channel.  Being single-reader is what guarantees
//!   that a response never overtakes the notifications emitted before it.
//! - **Client-in** frames arrive through [`Session::handle_client_frame`],
//!   called from each transport task.
//!
//! # Correlation tables
//! Ids are rewritten at the relay boundary in both directions; the origin
//! id is restored bit-exactly on the return path.  Agent-chosen and
//! client-chosen ids never share a space, so collisions are impossible.

use crate::agent::{AgentEvent, AgentHandle};
use crate::channel::{ClientChannel, BACKPRESSURE_TIMEOUT};
use crate::storage::journal::Direction;
use crate::storage::SharedJournal;
use acp_protocol::{methods, ErrorKind, FrameKind};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// A client request forwarded to the agent, awaiting the agent's response.
struct ClientPending {
    origin_id: Value,
    channel: Arc<ClientChannel>,
    /// True for `session/prompt`; closing the entry ends the turn.
    is_prompt: bool,
}

/// A reverse request forwarded to one client, awaiting that client's
/// response.
struct AgentPending {
    origin_id: Value,
    channel: Arc<ClientChannel>,
}

pub struct Session {
    id: String,
    working_dir: PathBuf,
    created_at: DateTime<Utc>,
    journal: SharedJournal,
    agent: AgentHandle,
    channels: Mutex<Vec<Arc<ClientChannel>>>,
    /// Keyed by the relay-assigned outgoing id sent to the agent.
    client_pending: Mutex<HashMap<u64, ClientPending>>,
    /// Keyed by the relay-assigned outgoing id sent to a client.
    agent_pending: Mutex<HashMap<u64, AgentPending>>,
    /// Relay -> client outgoing id counter for reverse requests.
    next_reverse_id: AtomicU64,
    /// Global stamp source for channel last-activity ordering.
    activity_clock: AtomicU64,
    /// Open `session/prompt` requests; zero means the session is idle.
    open_prompts: AtomicUsize,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

impl Session {
    pub fn new(
        id: String,
        working_dir: PathBuf,
        journal: SharedJournal,
        agent: AgentHandle,
    ) -> Self {
        Session {
            id,
            working_dir,
            created_at: Utc::now(),
            journal,
            agent,
            channels: Mutex::new(Vec::new()),
            client_pending: Mutex::new(HashMap::new()),
            agent_pending: Mutex::new(HashMap::new()),
            next_reverse_id: AtomicU64::new(0),
            activity_clock: AtomicU64::new(0),
            open_prompts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Active = not closed.  The agent's liveness and the pump's liveness
    /// are folded into this flag: whichever ends first closes the session.
    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// True while at least one `session/prompt` awaits its response.
    pub fn in_turn(&self) -> bool {
        self.open_prompts.load(Ordering::SeqCst) > 0
    }

    // -----------------------------------------------------------------------
    // Channel attachment
    // -----------------------------------------------------------------------

    /// Attach a client channel for fan-out and bind it to this session.
    /// Idempotent per channel.
    pub async fn attach(&self, channel: &Arc<ClientChannel>) -> Result<(), crate::error::RelayError> {
        if !self.is_active() {
            return Err(crate::error::RelayError::SessionClosed(self.id.clone()));
        }
        let mut channels = self.channels.lock().await;
        if !channels.iter().any(|c| c.id() == channel.id()) {
            channels.push(channel.clone());
        }
        channel.bind(&self.id);
        Ok(())
    }

    /// Detach a channel: remove it from fan-out, cancel its pending
    /// client -> agent correlations, and answer its routed reverse requests
    /// with a synthetic `ChannelClosed` error so the agent can unblock.
    pub async fn detach(&self, channel_id: u64) {
        {
            let mut channels = self.channels.lock().await;
            channels.retain(|c| c.id() != channel_id);
        }

        // Cancelled client requests: drop the entries.  The agent's eventual
        // responses are still read by the pump and dropped there.
        {
            let mut pending = self.client_pending.lock().await;
            pending.retain(|_, entry| {
                let keep = entry.channel.id() != channel_id;
                if !keep && entry.is_prompt {
                    self.open_prompts.fetch_sub(1, Ordering::SeqCst);
                }
                keep
            });
        }

        // Reverse requests routed to this channel complete with a synthetic
        // error on behalf of the departed client.
        let orphaned: Vec<AgentPending> = {
            let mut pending = self.agent_pending.lock().await;
            let keys: Vec<u64> = pending
                .iter()
                .filter(|(_, e)| e.channel.id() == channel_id)
                .map(|(k, _)| *k)
                .collect();
            keys.into_iter().filter_map(|k| pending.remove(&k)).collect()
        };
        for entry in orphaned {
            let frame = acp_protocol::error_response(
                entry.origin_id,
                ErrorKind::ChannelClosed,
                "the client this request was routed to disconnected",
            );
            if let Err(e) = self.agent.send(&frame).await {
                debug!(session_id = %self.id, error = %e, "agent gone while answering orphaned reverse request");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Client-in dispatch
    // -----------------------------------------------------------------------

    /// Route one frame from an attached client channel.
    ///
    /// The frame is journaled `client_to_relay` on entry; forwarding to the
    /// agent journals `relay_to_agent` before the bytes can reach the
    /// child.
    pub async fn handle_client_frame(&self, channel: &Arc<ClientChannel>, frame: Value) {
        {
            let mut journal = self.journal.lock().await;
            if let Err(e) = journal.append_frame(&self.id, Direction::ClientToRelay, &frame) {
                warn!(session_id = %self.id, error = %e, "journal append failed for client frame");
            }
        }
        channel.mark_activity(self.activity_clock.fetch_add(1, Ordering::SeqCst) + 1);

        let kind = match acp_protocol::classify(&frame) {
            Ok(kind) => kind,
            Err(e) => {
                let id = acp_protocol::id(&frame).cloned().unwrap_or(Value::Null);
                let error = crate::error::RelayError::Malformed(e.to_string()).to_frame(id);
                self.reply_to_channel(channel, error).await;
                return;
            }
        };

        if !self.is_active() {
            if kind == FrameKind::Request {
                let id = acp_protocol::id(&frame).cloned().unwrap_or(Value::Null);
                let error = crate::error::RelayError::SessionClosed(self.id.clone()).to_frame(id);
                self.reply_to_channel(channel, error).await;
            }
            return;
        }

        match kind {
            FrameKind::Request => self.forward_client_request(channel, frame).await,
            FrameKind::Response => self.forward_permission_reply(frame).await,
            FrameKind::Notification => {
                if let Err(e) = self.agent.send(&frame).await {
                    debug!(session_id = %self.id, error = %e, "dropping client notification; agent gone");
                }
            }
        }
    }

    /// Assign a fresh outgoing id, record the correlation, and write the
    /// request to the agent.
    async fn forward_client_request(&self, channel: &Arc<ClientChannel>, frame: Value) {
        let origin_id = acp_protocol::id(&frame).cloned().unwrap_or(Value::Null);
        let is_prompt = acp_protocol::method(&frame) == Some(methods::SESSION_PROMPT);

        let outgoing_id = self.agent.next_request_id();
        {
            let mut pending = self.client_pending.lock().await;
            pending.insert(
                outgoing_id,
                ClientPending {
                    origin_id: origin_id.clone(),
                    channel: channel.clone(),
                    is_prompt,
                },
            );
        }
        if is_prompt {
            self.open_prompts.fetch_add(1, Ordering::SeqCst);
        }

        let rewritten = acp_protocol::with_id(&frame, json!(outgoing_id));
        if let Err(e) = self.agent.send(&rewritten).await {
            warn!(session_id = %self.id, error = %e, "agent write failed; failing client request");
            {
                let mut pending = self.client_pending.lock().await;
                if let Some(entry) = pending.remove(&outgoing_id) {
                    if entry.is_prompt {
                        self.open_prompts.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }
            let error = crate::error::RelayError::SessionClosed(self.id.clone()).to_frame(origin_id);
            self.reply_to_channel(channel, error).await;
        }
    }

    /// A client answered a reverse request: restore the agent's original id
    /// and forward.  Unmatched responses are dropped and logged.
    async fn forward_permission_reply(&self, frame: Value) {
        let Some(outgoing_id) = acp_protocol::id(&frame).and_then(Value::as_u64) else {
            warn!(session_id = %self.id, "client response with non-relay id; dropping");
            return;
        };
        let entry = {
            let mut pending = self.agent_pending.lock().await;
            pending.remove(&outgoing_id)
        };
        let Some(entry) = entry else {
            warn!(session_id = %self.id, id = outgoing_id, "client response matches no reverse request; dropping");
            return;
        };
        let restored = acp_protocol::with_id(&frame, entry.origin_id);
        if let Err(e) = self.agent.send(&restored).await {
            debug!(session_id = %self.id, error = %e, "agent gone while forwarding permission reply");
        }
    }

    // -----------------------------------------------------------------------
    // Agent-out pump
    // -----------------------------------------------------------------------

    /// Drive the agent's event stream until the child exits or the session
    /// closes.  Spawned once per session by the registry.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<AgentEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Frame(frame) => self.handle_agent_frame(frame).await,
                AgentEvent::Malformed(_) => {
                    warn!(session_id = %self.id, "malformed agent frame; closing session");
                    self.shutdown().await;
                    break;
                }
                AgentEvent::Exited(code) => {
                    info!(session_id = %self.id, exit_code = ?code, "agent exited");
                    self.shutdown().await;
                    break;
                }
            }
        }
    }

    /// Dispatch one frame read from the agent (already journaled
    /// `agent_to_relay` by the reader task).
    async fn handle_agent_frame(&self, frame: Value) {
        let kind = match acp_protocol::classify(&frame) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "unclassifiable agent frame; closing session");
                self.shutdown().await;
                return;
            }
        };

        match kind {
            FrameKind::Response => self.route_agent_response(frame).await,
            FrameKind::Request => self.route_reverse_request(frame).await,
            FrameKind::Notification => self.fan_out_notification(frame).await,
        }
    }

    /// Match a response to the originating client and restore its id.
    async fn route_agent_response(&self, frame: Value) {
        let Some(outgoing_id) = acp_protocol::id(&frame).and_then(Value::as_u64) else {
            debug!(session_id = %self.id, "agent response with unknown id shape; dropping");
            return;
        };
        let entry = {
            let mut pending = self.client_pending.lock().await;
            pending.remove(&outgoing_id)
        };
        let Some(entry) = entry else {
            // Response to a request whose client went away; the pump keeps
            // draining, the frame is dropped.
            debug!(session_id = %self.id, id = outgoing_id, "agent response for cancelled request; dropping");
            return;
        };
        if entry.is_prompt {
            self.open_prompts.fetch_sub(1, Ordering::SeqCst);
        }

        let restored = acp_protocol::with_id(&frame, entry.origin_id);
        if self.journal_to_client(&restored).await {
            if let Err(e) = entry.channel.deliver(restored, BACKPRESSURE_TIMEOUT).await {
                warn!(session_id = %self.id, channel = entry.channel.id(), error = %e, "response delivery failed; detaching channel");
                self.detach(entry.channel.id()).await;
            }
        }
    }

    /// Route a reverse request (permission prompt) to exactly one client:
    /// the channel that most recently sent a frame, falling back to the
    /// oldest attached channel.  Ties break on channel-creation order.
    async fn route_reverse_request(&self, frame: Value) {
        let origin_id = acp_protocol::id(&frame).cloned().unwrap_or(Value::Null);

        let target = {
            let channels = self.channels.lock().await;
            channels
                .iter()
                .filter(|c| !c.is_closed())
                .max_by_key(|c| (c.last_activity(), Reverse(c.id())))
                .cloned()
        };
        let Some(target) = target else {
            let error = acp_protocol::error_response(
                origin_id,
                ErrorKind::ChannelClosed,
                "no client attached to receive the request",
            );
            if let Err(e) = self.agent.send(&error).await {
                debug!(session_id = %self.id, error = %e, "agent gone while refusing reverse request");
            }
            return;
        };

        let outgoing_id = self.next_reverse_id.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut pending = self.agent_pending.lock().await;
            pending.insert(
                outgoing_id,
                AgentPending {
                    origin_id,
                    channel: target.clone(),
                },
            );
        }

        let rewritten = acp_protocol::with_id(&frame, json!(outgoing_id));
        if self.journal_to_client(&rewritten).await {
            if let Err(e) = target.deliver(rewritten, BACKPRESSURE_TIMEOUT).await {
                warn!(session_id = %self.id, channel = target.id(), error = %e, "reverse request delivery failed; detaching channel");
                // Detach answers the entry we just inserted with a
                // synthetic ChannelClosed error toward the agent.
                self.detach(target.id()).await;
            }
        }
    }

    /// Deliver a notification to every attached channel in emission order.
    /// A channel that stays full past the backpressure timeout is detached.
    async fn fan_out_notification(&self, frame: Value) {
        if !self.journal_to_client(&frame).await {
            return;
        }
        let targets: Vec<Arc<ClientChannel>> = self.channels.lock().await.clone();
        let mut dead = Vec::new();
        for channel in targets {
            if let Err(e) = channel.deliver(frame.clone(), BACKPRESSURE_TIMEOUT).await {
                warn!(session_id = %self.id, channel = channel.id(), error = %e, "fan-out failed; detaching channel");
                dead.push(channel.id());
            }
        }
        for id in dead {
            self.detach(id).await;
        }
    }

    /// Journal a frame `relay_to_client`.  Returns false (and skips
    /// delivery) if the append failed: nothing reaches a client without a
    /// committed journal record.
    async fn journal_to_client(&self, frame: &Value) -> bool {
        let mut journal = self.journal.lock().await;
        match journal.append_frame(&self.id, Direction::RelayToClient, frame) {
            Ok(_) => true,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "journal append failed; frame not delivered");
                false
            }
        }
    }

    async fn reply_to_channel(&self, channel: &Arc<ClientChannel>, frame: Value) {
        if self.journal_to_client(&frame).await {
            let _ = channel.deliver(frame, BACKPRESSURE_TIMEOUT).await;
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Close the session: answer pending correlations in both directions,
    /// kill and reap the agent, detach every channel, then set the journal
    /// close timestamp.  Safe to call from both the registry and the pump;
    /// only the first caller does the work.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.id, "closing session");

        // Unblock the agent for reverse requests nobody will answer now.
        let reverse: Vec<AgentPending> = {
            let mut pending = self.agent_pending.lock().await;
            pending.drain().map(|(_, e)| e).collect()
        };
        for entry in reverse {
            let frame = acp_protocol::error_response(
                entry.origin_id,
                ErrorKind::ChannelClosed,
                "session closing before the client answered",
            );
            let _ = self.agent.send(&frame).await;
        }

        // Reap the child before the journal close timestamp is written.
        self.agent.shutdown().await;

        // Every pending client request completes with SessionClosed.
        let pending: Vec<ClientPending> = {
            let mut pending = self.client_pending.lock().await;
            pending.drain().map(|(_, e)| e).collect()
        };
        self.open_prompts.store(0, Ordering::SeqCst);
        for entry in pending {
            let error =
                crate::error::RelayError::SessionClosed(self.id.clone()).to_frame(entry.origin_id);
            if self.journal_to_client(&error).await {
                let _ = entry.channel.deliver(error, BACKPRESSURE_TIMEOUT).await;
            }
        }

        let channels: Vec<Arc<ClientChannel>> = {
            let mut channels = self.channels.lock().await;
            channels.drain(..).collect()
        };
        for channel in channels {
            channel.unbind();
        }

        {
            let mut journal = self.journal.lock().await;
            if let Err(e) = journal.close_session(&self.id) {
                warn!(session_id = %self.id, error = %e, "failed to set journal close timestamp");
            }
        }
    }

    /// The agent handle's command label, for the health surface.
    pub fn agent_command(&self) -> &str {
        self.agent.command_label()
    }
}
