//! Relay-boundary errors and their mapping onto the JSON-RPC taxonomy.

use crate::agent::AgentError;
use crate::config::ConfigError;
use crate::storage::journal::JournalError;
use acp_protocol::ErrorKind;
use serde_json::Value;
use std::time::Duration;

/// Error type spanning the relay's client-facing operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("journal: {0}")]
    Journal(#[from] JournalError),
    #[error("failed to bind listener: {0}")]
    Listen(std::io::Error),
    #[error("agent launch failed: {0}")]
    AgentLaunch(String),
    #[error("agent negotiated protocol version {agent}, relay requires {relay}")]
    ProtocolMismatch { agent: i64, relay: i64 },
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("session {0} is closed")]
    SessionClosed(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("client channel closed")]
    ChannelClosed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// The taxonomy kind carried as the JSON-RPC error code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Config(_) => ErrorKind::ConfigError,
            RelayError::Journal(_) | RelayError::Listen(_) | RelayError::Internal(_) => {
                ErrorKind::Internal
            }
            RelayError::AgentLaunch(_) => ErrorKind::AgentLaunchFailed,
            RelayError::ProtocolMismatch { .. } => ErrorKind::ProtocolMismatch,
            RelayError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            RelayError::SessionClosed(_) => ErrorKind::SessionClosed,
            RelayError::MethodNotAllowed(_) => ErrorKind::MethodNotAllowed,
            RelayError::Malformed(_) => ErrorKind::Malformed,
            RelayError::ChannelClosed => ErrorKind::ChannelClosed,
            RelayError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Build the JSON-RPC error response for this error, attributed to the
    /// request with `id` (`Value::Null` when unattributable).
    pub fn to_frame(&self, id: Value) -> Value {
        let actions = self.suggested_actions();
        acp_protocol::error_response_with_actions(id, self.kind(), &self.to_string(), &actions)
    }

    fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            RelayError::SessionNotFound(_) | RelayError::SessionClosed(_) => {
                vec!["create a new session with session/new"]
            }
            RelayError::AgentLaunch(_) => {
                vec!["check agent.command in the relay config", "inspect the journal stderr records"]
            }
            _ => Vec::new(),
        }
    }
}

impl From<AgentError> for RelayError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::ProtocolMismatch { agent, relay } => {
                RelayError::ProtocolMismatch { agent, relay }
            }
            AgentError::Journal(j) => RelayError::Journal(j),
            other => RelayError::AgentLaunch(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_errors_map_to_their_taxonomy_codes() {
        let not_found = RelayError::SessionNotFound("sess_x".to_owned());
        assert_eq!(not_found.kind().code(), -32001);
        let closed = RelayError::SessionClosed("sess_x".to_owned());
        assert_eq!(closed.kind().code(), -32002);
    }

    #[test]
    fn to_frame_attributes_the_request_id_and_explains() {
        let err = RelayError::SessionClosed("sess_1".to_owned());
        let frame = err.to_frame(json!(7));
        assert_eq!(frame["id"], json!(7));
        assert_eq!(frame["error"]["code"], json!(-32002));
        assert!(frame["error"]["data"]["explanation"]
            .as_str()
            .unwrap()
            .contains("sess_1"));
        assert!(frame["error"]["data"]["suggested_actions"].is_array());
    }
}
