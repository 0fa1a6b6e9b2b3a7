//! Process-wide session registry: creation, resume, close.
//!
//! Creation is build-then-insert: the agent is spawned, initialized, and
//! asked for its session id before the map is touched, so a failure at any
//! step leaves no half-constructed entry, and the child is killed on the
//! way out, so none leaks either.

use crate::agent::AgentLauncher;
use crate::config::WorkingDirPolicy;
use crate::error::RelayError;
use crate::session::Session;
use crate::storage::SharedJournal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    launcher: Arc<dyn AgentLauncher>,
    journal: SharedJournal,
    protocol_version: i64,
    dir_policy: WorkingDirPolicy,
}

impl SessionRegistry {
    pub fn new(
        launcher: Arc<dyn AgentLauncher>,
        journal: SharedJournal,
        protocol_version: i64,
        dir_policy: WorkingDirPolicy,
    ) -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
            launcher,
            journal,
            protocol_version,
            dir_policy,
        }
    }

    /// `session/new`: journal row, launch, initialize, adopt the agent's
    /// session id if it allocates one, insert, spawn the pump.
    pub async fn create(&self, requested_dir: &str) -> Result<Arc<Session>, RelayError> {
        let provisional = format!("sess_{}", Uuid::new_v4().simple());
        let working_dir = self.dir_policy.resolve(requested_dir, &provisional);
        if matches!(self.dir_policy, WorkingDirPolicy::PerSession(_)) {
            std::fs::create_dir_all(&working_dir)
                .map_err(|e| RelayError::AgentLaunch(format!("working directory: {e}")))?;
        }

        {
            let mut journal = self.journal.lock().await;
            journal.create_session(&provisional, &working_dir.to_string_lossy())?;
        }

        let mut agent = match self
            .launcher
            .launch(&provisional, &working_dir, self.journal.clone())
            .await
        {
            Ok(agent) => agent,
            Err(e) => {
                self.close_journal_row(&provisional).await;
                return Err(e.into());
            }
        };

        // initialize() kills the child itself on failure.
        if let Err(e) = agent.initialize(self.protocol_version).await {
            self.close_journal_row(&provisional).await;
            return Err(e.into());
        }

        let adopted = match agent.open_agent_session(&working_dir).await {
            Ok(adopted) => adopted,
            Err(e) => {
                agent.shutdown().await;
                self.close_journal_row(&provisional).await;
                return Err(e.into());
            }
        };

        let session_id = match adopted.filter(|id| !id.is_empty()) {
            Some(agent_id) => {
                let mut journal = self.journal.lock().await;
                journal.rename_session(&provisional, &agent_id)?;
                agent.rebind_session(&agent_id);
                agent_id
            }
            None => provisional,
        };

        let events = agent
            .take_events()
            .ok_or_else(|| RelayError::Internal("agent event stream already taken".to_owned()))?;
        let session = Arc::new(Session::new(
            session_id.clone(),
            working_dir,
            self.journal.clone(),
            agent,
        ));

        {
            let mut sessions = self.sessions.write().await;
            if sessions.get(&session_id).is_some_and(|s| s.is_active()) {
                drop(sessions);
                warn!(session_id = %session_id, "agent allocated an id that is already active");
                session.shutdown().await;
                return Err(RelayError::Internal(format!(
                    "duplicate active session id {session_id}"
                )));
            }
            sessions.insert(session_id.clone(), session.clone());
        }

        tokio::spawn(session.clone().run(events));
        info!(session_id = %session_id, "session created");
        Ok(session)
    }

    /// `session/resume`: the session must exist and be active.  A closed
    /// entry (or a journal row with no live session) is `SessionClosed`;
    /// anything else is `SessionNotFound`.  Never silently creates.
    pub async fn resume(&self, session_id: &str) -> Result<Arc<Session>, RelayError> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            if session.is_active() {
                return Ok(session.clone());
            }
            return Err(RelayError::SessionClosed(session_id.to_owned()));
        }

        let journal = self.journal.lock().await;
        match journal.session_row(session_id)? {
            Some(_) => Err(RelayError::SessionClosed(session_id.to_owned())),
            None => Err(RelayError::SessionNotFound(session_id.to_owned())),
        }
    }

    /// `session/close`: shut the session down and remove it from the map.
    pub async fn close(&self, session_id: &str) -> Result<(), RelayError> {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                let was_active = session.is_active();
                session.shutdown().await;
                if was_active {
                    Ok(())
                } else {
                    Err(RelayError::SessionClosed(session_id.to_owned()))
                }
            }
            None => {
                let journal = self.journal.lock().await;
                match journal.session_row(session_id)? {
                    Some(_) => Err(RelayError::SessionClosed(session_id.to_owned())),
                    None => Err(RelayError::SessionNotFound(session_id.to_owned())),
                }
            }
        }
    }

    /// Look up a session for content routing.  Distinguishes closed from
    /// unknown the same way resume does.
    pub async fn lookup(&self, session_id: &str) -> Result<Arc<Session>, RelayError> {
        self.resume(session_id).await
    }

    /// Number of active sessions, for the health surface.
    pub async fn live_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_active())
            .count()
    }

    /// Close every session; used at process shutdown.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.shutdown().await;
        }
    }

    async fn close_journal_row(&self, session_id: &str) {
        let mut journal = self.journal.lock().await;
        if let Err(e) = journal.close_session(session_id) {
            warn!(session_id = %session_id, error = %e, "failed to close journal row after launch failure");
        }
    }
}
