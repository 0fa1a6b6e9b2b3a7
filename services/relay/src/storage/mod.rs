pub mod journal;

use std::sync::Arc;
use tokio::sync::Mutex;

/// Journal handle shared by every session's pumps and the front doors.
///
/// Appends are short, synchronous SQLite statements; the async mutex keeps
/// writers serialized without blocking the runtime across a statement.
pub type SharedJournal = Arc<Mutex<journal::Journal>>;
