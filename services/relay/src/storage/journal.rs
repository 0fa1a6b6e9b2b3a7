//! Durable SQLite journal of every JSON-RPC frame crossing the relay.
//!
//! # Schema
//! - `sessions`: one row per session with open/close timestamps.
//! - `messages`: one row per frame (or stderr diagnostic), keyed by an
//!   auto-increment sequence that totally orders frames as they crossed
//!   the relay.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, wal_autocheckpoint=1000,
//! foreign_keys=ON.  PRAGMA integrity_check runs at open; returns error if
//! it fails.
//!
//! A frame is appended *before* it is delivered downstream, so the journal
//! is a faithful log of what the relay attempted to forward.  Readers poll
//! with `messages_after(session, seq)`.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which hop of the relay a message row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToRelay,
    RelayToAgent,
    AgentToRelay,
    RelayToClient,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ClientToRelay => "client_to_relay",
            Direction::RelayToAgent => "relay_to_agent",
            Direction::AgentToRelay => "agent_to_relay",
            Direction::RelayToClient => "relay_to_client",
        }
    }
}

/// A session row.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub working_directory: String,
    pub created_at: String,
    pub closed_at: Option<String>,
}

/// A message row retrieved from the journal.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Auto-increment sequence; total order across the whole journal.
    pub seq: i64,
    pub session_id: String,
    pub direction: String,
    pub message_type: String,
    pub method: Option<String>,
    /// The frame's `id` member serialized as JSON text (`1`, `"p1"`).
    pub jsonrpc_id: Option<String>,
    pub raw_message: Vec<u8>,
    pub timestamp: String,
}

/// Error type for journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

// ---------------------------------------------------------------------------
// Journal struct
// ---------------------------------------------------------------------------

/// The append-only store for a single relay instance.
pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open (or create) the journal at the given path.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates tables
    /// if needed.  Returns `Err` if integrity_check fails.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        apply_schema(&conn)?;
        Ok(Journal { conn })
    }

    // -----------------------------------------------------------------------
    // Session rows
    // -----------------------------------------------------------------------

    /// Insert the session row with an unset close timestamp.
    pub fn create_session(
        &mut self,
        session_id: &str,
        working_directory: &str,
    ) -> Result<(), JournalError> {
        self.conn.execute(
            "INSERT INTO sessions (id, working_directory, created_at, closed_at)
             VALUES (?1, ?2, ?3, NULL)",
            params![session_id, working_directory, now_utc()],
        )?;
        Ok(())
    }

    /// Set the session's close timestamp.  Idempotent: a second close keeps
    /// the first timestamp.
    pub fn close_session(&mut self, session_id: &str) -> Result<(), JournalError> {
        let updated = self.conn.execute(
            "UPDATE sessions SET closed_at = ?2 WHERE id = ?1 AND closed_at IS NULL",
            params![session_id, now_utc()],
        )?;
        if updated == 0 {
            // Either already closed or unknown; unknown is the caller's bug.
            let exists: Option<String> = self
                .conn
                .query_row(
                    "SELECT id FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(JournalError::UnknownSession(session_id.to_owned()));
            }
        }
        Ok(())
    }

    /// Adopt an agent-allocated session id: rewrite the session row and any
    /// already-journaled messages in one transaction.
    pub fn rename_session(&mut self, old_id: &str, new_id: &str) -> Result<(), JournalError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE sessions SET id = ?2 WHERE id = ?1",
            params![old_id, new_id],
        )?;
        tx.execute(
            "UPDATE messages SET session_id = ?2 WHERE session_id = ?1",
            params![old_id, new_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Look up one session row.
    pub fn session_row(&self, session_id: &str) -> Result<Option<SessionRecord>, JournalError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, working_directory, created_at, closed_at
                 FROM sessions WHERE id = ?1",
                params![session_id],
                map_session,
            )
            .optional()?;
        Ok(row)
    }

    /// All session rows, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>, JournalError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, working_directory, created_at, closed_at
             FROM sessions ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], map_session)?;
        let mut sessions = Vec::new();
        for r in rows {
            sessions.push(r?);
        }
        Ok(sessions)
    }

    // -----------------------------------------------------------------------
    // Message rows
    // -----------------------------------------------------------------------

    /// Append one frame, returning its sequence number.
    ///
    /// Classification and method/id extraction happen here so every caller
    /// journals the same shape.  A single INSERT is transactional in SQLite.
    pub fn append_frame(
        &mut self,
        session_id: &str,
        direction: Direction,
        frame: &Value,
    ) -> Result<i64, JournalError> {
        let message_type = acp_protocol::classify(frame)
            .map(acp_protocol::FrameKind::as_str)
            .unwrap_or("malformed");
        let method = acp_protocol::method(frame).map(ToOwned::to_owned);
        let jsonrpc_id = acp_protocol::id(frame).map(ToString::to_string);
        self.append_raw(
            session_id,
            direction,
            message_type,
            method.as_deref(),
            jsonrpc_id.as_deref(),
            frame.to_string().as_bytes(),
        )
    }

    /// Append one stderr line from the agent as an out-of-band diagnostic.
    pub fn append_stderr(&mut self, session_id: &str, line: &str) -> Result<i64, JournalError> {
        self.append_raw(
            session_id,
            Direction::AgentToRelay,
            "stderr",
            None,
            None,
            line.as_bytes(),
        )
    }

    /// Append a line that failed codec validation, so the error path is
    /// visible to the inspection tools.
    pub fn append_malformed(
        &mut self,
        session_id: &str,
        direction: Direction,
        raw: &str,
    ) -> Result<i64, JournalError> {
        self.append_raw(session_id, direction, "malformed", None, None, raw.as_bytes())
    }

    fn append_raw(
        &mut self,
        session_id: &str,
        direction: Direction,
        message_type: &str,
        method: Option<&str>,
        jsonrpc_id: Option<&str>,
        raw_message: &[u8],
    ) -> Result<i64, JournalError> {
        self.conn.execute(
            "INSERT INTO messages
                 (session_id, direction, message_type, method, jsonrpc_id, raw_message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                direction.as_str(),
                message_type,
                method,
                jsonrpc_id,
                raw_message,
                now_utc(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // -----------------------------------------------------------------------
    // Query helpers
    // -----------------------------------------------------------------------

    /// All messages for a session with sequence strictly greater than
    /// `after_seq`, in sequence order.  This is the polling surface the
    /// inspection tools sit on.
    pub fn messages_after(
        &self,
        session_id: &str,
        after_seq: i64,
    ) -> Result<Vec<MessageRecord>, JournalError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, direction, message_type, method, jsonrpc_id, raw_message, timestamp
             FROM messages
             WHERE session_id = ?1 AND id > ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id, after_seq], map_message)?;
        let mut messages = Vec::new();
        for r in rows {
            messages.push(r?);
        }
        Ok(messages)
    }

    /// Count message rows for a session.
    pub fn message_count(&self, session_id: &str) -> Result<i64, JournalError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn apply_pragmas(conn: &Connection) -> Result<(), JournalError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA wal_autocheckpoint=1000;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), JournalError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(JournalError::IntegrityCheckFailed(result));
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), JournalError> {
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(())
}

fn map_session(row: &rusqlite::Row<'_>) -> Result<SessionRecord, rusqlite::Error> {
    Ok(SessionRecord {
        id: row.get(0)?,
        working_directory: row.get(1)?,
        created_at: row.get(2)?,
        closed_at: row.get(3)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> Result<MessageRecord, rusqlite::Error> {
    Ok(MessageRecord {
        seq: row.get(0)?,
        session_id: row.get(1)?,
        direction: row.get(2)?,
        message_type: row.get(3)?,
        method: row.get(4)?,
        jsonrpc_id: row.get(5)?,
        raw_message: row.get(6)?,
        timestamp: row.get(7)?,
    })
}

/// RFC 3339 UTC timestamp for session and message rows.
fn now_utc() -> String {
    Utc::now().to_rfc3339()
}
