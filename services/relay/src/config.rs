//! Relay configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `./relay.toml`.
//!
//! # Required fields
//! - `agent.command` with at least one element
//! - `sandbox.image` when `sandbox.enabled = true`
//!
//! # Working directory policy
//! `agent.working_directory_policy` is one of:
//! - `"pass-through"`: use the client-supplied path as-is (default)
//! - `"fixed:<path>"`: every session runs in `<path>`
//! - `"per-session:<base>"`: each session gets `<base>/<session-id>`

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

/// Top-level relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Protocol version declared to agents in `initialize`.
    pub protocol_version: i64,
    pub agent: AgentConfig,
    pub sandbox: SandboxConfig,
    pub listen: ListenConfig,
    pub journal: JournalConfig,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// argv used to launch the agent (`command[0]` is the binary).
    pub command: Vec<String>,
    pub working_directory_policy: WorkingDirPolicy,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub enabled: bool,
    /// Image tag; required when `enabled`.
    pub image: Option<String>,
    /// Environment variables copied from the relay's environment into the
    /// container (e.g. credentials the agent requires).
    pub env_allowlist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub http: SocketAddr,
    pub ws: SocketAddr,
    pub health: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub path: PathBuf,
}

/// How the `workingDirectory` param of `session/new` maps to the directory
/// the agent child actually runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingDirPolicy {
    PassThrough,
    Fixed(PathBuf),
    PerSession(PathBuf),
}

impl WorkingDirPolicy {
    /// Resolve the effective working directory for a session.
    pub fn resolve(&self, requested: &str, session_id: &str) -> PathBuf {
        match self {
            WorkingDirPolicy::PassThrough => PathBuf::from(requested),
            WorkingDirPolicy::Fixed(path) => path.clone(),
            WorkingDirPolicy::PerSession(base) => base.join(session_id),
        }
    }

    fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw == "pass-through" {
            return Ok(WorkingDirPolicy::PassThrough);
        }
        if let Some(path) = raw.strip_prefix("fixed:") {
            if path.is_empty() {
                return Err(ConfigError::Invalid(
                    "working_directory_policy: fixed: requires a path".to_owned(),
                ));
            }
            return Ok(WorkingDirPolicy::Fixed(PathBuf::from(path)));
        }
        if let Some(base) = raw.strip_prefix("per-session:") {
            if base.is_empty() {
                return Err(ConfigError::Invalid(
                    "working_directory_policy: per-session: requires a base path".to_owned(),
                ));
            }
            return Ok(WorkingDirPolicy::PerSession(PathBuf::from(base)));
        }
        Err(ConfigError::Invalid(format!(
            "unknown working_directory_policy: {raw}"
        )))
    }
}

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    protocol_version: Option<i64>,
    agent: Option<RawAgentConfig>,
    sandbox: Option<RawSandboxConfig>,
    listen: Option<RawListenConfig>,
    journal: Option<RawJournalConfig>,
}

#[derive(Debug, Deserialize)]
struct RawAgentConfig {
    command: Option<Vec<String>>,
    working_directory_policy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSandboxConfig {
    enabled: Option<bool>,
    image: Option<String>,
    env_allowlist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawListenConfig {
    http: Option<String>,
    ws: Option<String>,
    health: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJournalConfig {
    path: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Default config path when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./relay.toml";

/// Load and validate the config at `path`.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Parse and validate config from TOML text.
pub fn parse_config(text: &str) -> Result<RelayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;

    let raw_agent = raw
        .agent
        .ok_or_else(|| ConfigError::Invalid("missing [agent] section".to_owned()))?;
    let command = raw_agent
        .command
        .ok_or_else(|| ConfigError::Invalid("agent.command is required".to_owned()))?;
    if command.is_empty() || command[0].is_empty() {
        return Err(ConfigError::Invalid(
            "agent.command must have at least one non-empty element".to_owned(),
        ));
    }
    let working_directory_policy = match raw_agent.working_directory_policy {
        Some(raw) => WorkingDirPolicy::parse(&raw)?,
        None => WorkingDirPolicy::PassThrough,
    };

    let raw_sandbox = raw.sandbox.unwrap_or(RawSandboxConfig {
        enabled: None,
        image: None,
        env_allowlist: None,
    });
    let sandbox_enabled = raw_sandbox.enabled.unwrap_or(false);
    if sandbox_enabled && raw_sandbox.image.as_deref().unwrap_or("").is_empty() {
        return Err(ConfigError::Invalid(
            "sandbox.image is required when sandbox.enabled = true".to_owned(),
        ));
    }

    let raw_listen = raw.listen.unwrap_or(RawListenConfig {
        http: None,
        ws: None,
        health: None,
    });

    let raw_journal = raw.journal.unwrap_or(RawJournalConfig { path: None });

    Ok(RelayConfig {
        protocol_version: raw.protocol_version.unwrap_or(acp_protocol::PROTOCOL_VERSION),
        agent: AgentConfig {
            command,
            working_directory_policy,
        },
        sandbox: SandboxConfig {
            enabled: sandbox_enabled,
            image: raw_sandbox.image,
            env_allowlist: raw_sandbox.env_allowlist.unwrap_or_default(),
        },
        listen: ListenConfig {
            http: parse_addr(raw_listen.http.as_deref(), "127.0.0.1:8080", "listen.http")?,
            ws: parse_addr(raw_listen.ws.as_deref(), "127.0.0.1:8081", "listen.ws")?,
            health: parse_addr(
                raw_listen.health.as_deref(),
                "127.0.0.1:8082",
                "listen.health",
            )?,
        },
        journal: JournalConfig {
            path: PathBuf::from(
                raw_journal
                    .path
                    .unwrap_or_else(|| "./relay-messages.db".to_owned()),
            ),
        },
    })
}

fn parse_addr(raw: Option<&str>, default: &str, field: &str) -> Result<SocketAddr, ConfigError> {
    let text = raw.unwrap_or(default);
    text.parse()
        .map_err(|_| ConfigError::Invalid(format!("{field}: not a socket address: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config(
            r#"
            [agent]
            command = ["mock-agent"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.protocol_version, 1);
        assert_eq!(cfg.agent.working_directory_policy, WorkingDirPolicy::PassThrough);
        assert!(!cfg.sandbox.enabled);
        assert_eq!(cfg.listen.http.port(), 8080);
        assert_eq!(cfg.listen.ws.port(), 8081);
        assert_eq!(cfg.listen.health.port(), 8082);
        assert_eq!(cfg.journal.path, PathBuf::from("./relay-messages.db"));
    }

    #[test]
    fn missing_agent_command_is_rejected() {
        assert!(parse_config("[agent]\n").is_err());
        assert!(parse_config("[agent]\ncommand = []\n").is_err());
    }

    #[test]
    fn sandbox_requires_image_when_enabled() {
        let err = parse_config(
            r#"
            [agent]
            command = ["agent"]
            [sandbox]
            enabled = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn working_directory_policies_parse_and_resolve() {
        assert_eq!(
            WorkingDirPolicy::parse("pass-through").unwrap().resolve("/tmp/x", "s1"),
            PathBuf::from("/tmp/x")
        );
        assert_eq!(
            WorkingDirPolicy::parse("fixed:/srv/work").unwrap().resolve("/tmp/x", "s1"),
            PathBuf::from("/srv/work")
        );
        assert_eq!(
            WorkingDirPolicy::parse("per-session:/srv/sessions")
                .unwrap()
                .resolve("/tmp/x", "s1"),
            PathBuf::from("/srv/sessions/s1")
        );
        assert!(WorkingDirPolicy::parse("bogus").is_err());
        assert!(WorkingDirPolicy::parse("fixed:").is_err());
    }
}
