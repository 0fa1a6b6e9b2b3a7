//! Container launcher: runs the agent inside a Docker container with the
//! session working directory bind-mounted at a fixed in-container path.
//!
//! Stdio is forwarded transparently through `docker run -i`, so the router
//! cannot tell a containerized agent from a direct one.  The container is
//! named after the session; shutdown force-removes it in addition to
//! killing the `docker run` child, so a wedged CLI cannot leave an orphan
//! container behind.

use super::{spawn_with_retry, AgentError, AgentHandle, AgentLauncher};
use crate::storage::SharedJournal;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Fixed mount point for the session working directory inside the container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Launches the agent argv inside a container from `sandbox.image`.
pub struct ContainerLauncher {
    image: String,
    argv: Vec<String>,
    env_allowlist: Vec<String>,
}

impl ContainerLauncher {
    pub fn new(image: String, argv: Vec<String>, env_allowlist: Vec<String>) -> Self {
        ContainerLauncher {
            image,
            argv,
            env_allowlist,
        }
    }

    fn container_name(session_id: &str) -> String {
        format!("acp-relay-{session_id}")
    }

    /// Build the full `docker run` argv for a session.
    fn docker_argv(&self, session_id: &str, working_dir: &Path) -> Vec<String> {
        let mut argv = vec![
            "run".to_owned(),
            "-i".to_owned(),
            "--rm".to_owned(),
            "--name".to_owned(),
            Self::container_name(session_id),
            "-v".to_owned(),
            format!("{}:{}", working_dir.display(), CONTAINER_WORKDIR),
            "-w".to_owned(),
            CONTAINER_WORKDIR.to_owned(),
        ];
        for key in &self.env_allowlist {
            if let Ok(value) = std::env::var(key) {
                argv.push("-e".to_owned());
                argv.push(format!("{key}={value}"));
            }
        }
        argv.push(self.image.clone());
        argv.extend(self.argv.iter().cloned());
        argv
    }
}

#[async_trait]
impl AgentLauncher for ContainerLauncher {
    async fn launch(
        &self,
        session_id: &str,
        working_dir: &Path,
        journal: SharedJournal,
    ) -> Result<AgentHandle, AgentError> {
        let name = Self::container_name(session_id);
        let docker_argv = self.docker_argv(session_id, working_dir);
        debug!(container = %name, "starting containerized agent");

        let mut command = Command::new("docker");
        command
            .args(&docker_argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = spawn_with_retry(&mut command, &self.command_label()).await?;
        AgentHandle::from_child(child, self.command_label(), session_id, journal, Some(name))
    }

    fn command_label(&self) -> String {
        format!("docker:{} {}", self.image, self.argv.join(" "))
    }
}
