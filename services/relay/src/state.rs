use crate::registry::SessionRegistry;
use crate::storage::SharedJournal;
use std::sync::Arc;
use std::time::Instant;

/// Shared state behind every front door.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub journal: SharedJournal,
    /// Configured agent command identifier, reported by the health surface.
    pub agent_command: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, journal: SharedJournal, agent_command: String) -> Self {
        AppState {
            registry,
            journal,
            agent_command,
            started_at: Instant::now(),
        }
    }
}
