// Method names at the relay's two boundaries.
//
// Lifecycle methods are handled by the relay itself; everything else is
// routed.  The agent-side names are ACP's own.

/// Relay -> agent handshake, sent once per child before `Ready`.
pub const INITIALIZE: &str = "initialize";

/// Client -> relay: create a session (also forwarded to the agent as ACP
/// `session/new` with `{cwd, mcpServers}` params).
pub const SESSION_NEW: &str = "session/new";

/// Client -> relay: attach to an existing session.
pub const SESSION_RESUME: &str = "session/resume";

/// Client -> relay: close a session and kill its agent.
pub const SESSION_CLOSE: &str = "session/close";

/// Client -> agent: start a turn.
pub const SESSION_PROMPT: &str = "session/prompt";

/// Agent -> clients notification carrying `update.sessionUpdate`.
pub const SESSION_UPDATE: &str = "session/update";

/// Agent -> one client reverse request for a permission decision.
pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";

/// True for the methods the relay services itself rather than forwarding.
pub fn is_lifecycle(method: &str) -> bool {
    matches!(method, SESSION_NEW | SESSION_RESUME | SESSION_CLOSE)
}
