//! Direct launcher: runs the configured agent command as a plain child
//! process with its current directory set to the session working directory.

use super::{spawn_with_retry, AgentError, AgentHandle, AgentLauncher};
use crate::storage::SharedJournal;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Launches the agent argv from `agent.command`.
pub struct DirectLauncher {
    argv: Vec<String>,
}

impl DirectLauncher {
    /// `argv` must be non-empty (validated at config load).
    pub fn new(argv: Vec<String>) -> Self {
        DirectLauncher { argv }
    }
}

#[async_trait]
impl AgentLauncher for DirectLauncher {
    async fn launch(
        &self,
        session_id: &str,
        working_dir: &Path,
        journal: SharedJournal,
    ) -> Result<AgentHandle, AgentError> {
        let label = self.command_label();
        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = spawn_with_retry(&mut command, &label).await?;
        AgentHandle::from_child(child, label, session_id, journal, None)
    }

    fn command_label(&self) -> String {
        self.argv.join(" ")
    }
}
