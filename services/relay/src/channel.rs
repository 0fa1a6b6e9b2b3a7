//! Client channels: the session-facing half of a client connection.
//!
//! A channel is a bounded send queue plus routing metadata.  The receiving
//! end is owned by the transport task (WebSocket writer loop or HTTP
//! handler); when the transport dies the queue closes and the session's
//! fan-out observes it and detaches.  Sessions hold the channel handle but
//! never the transport, so a channel cannot keep a dead connection alive.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Outbound frames a channel can buffer before fan-out backpressure kicks in.
pub const CHANNEL_QUEUE_CAPACITY: usize = 256;

/// How long fan-out blocks on a full queue before the channel is detached.
pub const BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport kind behind a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    WebSocket,
    /// One HTTP request waiting for exactly one response frame.
    HttpOneShot,
}

/// Why a delivery failed.
#[derive(Debug, thiserror::Error)]
pub enum ChannelSendError {
    #[error("channel closed")]
    Closed,
    #[error("send queue full past the backpressure timeout")]
    Full,
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// One client connection as the session sees it.
pub struct ClientChannel {
    id: u64,
    kind: ChannelKind,
    tx: mpsc::Sender<Value>,
    /// Stamp of the last frame this client sent into a session; drives
    /// reverse-request target selection.
    last_activity: AtomicU64,
    bound_session: Mutex<Option<String>>,
}

impl ClientChannel {
    /// Create a channel and the transport-owned receiving end.
    pub fn pair(kind: ChannelKind) -> (Arc<Self>, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        let channel = Arc::new(ClientChannel {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::SeqCst),
            kind,
            tx,
            last_activity: AtomicU64::new(0),
            bound_session: Mutex::new(None),
        });
        (channel, rx)
    }

    /// Channel id; monotonically increasing, so it doubles as creation
    /// order for the reverse-request tie-break.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Queue a frame toward the transport, blocking up to `limit` on a
    /// full queue.
    pub async fn deliver(&self, frame: Value, limit: Duration) -> Result<(), ChannelSendError> {
        match self.tx.send_timeout(frame, limit).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(ChannelSendError::Closed),
            Err(SendTimeoutError::Timeout(_)) => Err(ChannelSendError::Full),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn mark_activity(&self, stamp: u64) {
        self.last_activity.store(stamp, Ordering::SeqCst);
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    pub fn bind(&self, session_id: &str) {
        *self.bound_session.lock().expect("bound_session lock") = Some(session_id.to_owned());
    }

    pub fn unbind(&self) {
        *self.bound_session.lock().expect("bound_session lock") = None;
    }

    pub fn bound_session(&self) -> Option<String> {
        self.bound_session.lock().expect("bound_session lock").clone()
    }
}
