/// Config loading from a real file, including the full option surface.
use relay::config::{load_config, WorkingDirPolicy};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn full_config_round_trips_every_option() {
    let mut f = NamedTempFile::new().unwrap();
    write!(
        f,
        r#"
protocol_version = 1

[agent]
command = ["claude-code-acp", "--stdio"]
working_directory_policy = "per-session:/srv/acp-sessions"

[sandbox]
enabled = true
image = "acp-relay-runtime:latest"
env_allowlist = ["ANTHROPIC_API_KEY"]

[listen]
http = "0.0.0.0:8080"
ws = "0.0.0.0:8081"
health = "0.0.0.0:8082"

[journal]
path = "/var/lib/acp-relay/relay-messages.db"
"#
    )
    .unwrap();

    let cfg = load_config(f.path()).unwrap();
    assert_eq!(cfg.protocol_version, 1);
    assert_eq!(cfg.agent.command, vec!["claude-code-acp", "--stdio"]);
    assert_eq!(
        cfg.agent.working_directory_policy,
        WorkingDirPolicy::PerSession("/srv/acp-sessions".into())
    );
    assert!(cfg.sandbox.enabled);
    assert_eq!(cfg.sandbox.image.as_deref(), Some("acp-relay-runtime:latest"));
    assert_eq!(cfg.sandbox.env_allowlist, vec!["ANTHROPIC_API_KEY"]);
    assert_eq!(cfg.listen.http.port(), 8080);
    assert_eq!(cfg.listen.ws.port(), 8081);
    assert_eq!(cfg.listen.health.port(), 8082);
    assert_eq!(
        cfg.journal.path.to_string_lossy(),
        "/var/lib/acp-relay/relay-messages.db"
    );
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_config(std::path::Path::new("/nonexistent/relay.toml")).unwrap_err();
    assert!(matches!(err, relay::config::ConfigError::Io(_)));
}

#[test]
fn bad_listen_address_is_rejected() {
    let mut f = NamedTempFile::new().unwrap();
    write!(
        f,
        r#"
[agent]
command = ["agent"]

[listen]
http = "not-an-address"
"#
    )
    .unwrap();
    let err = load_config(f.path()).unwrap_err();
    assert!(matches!(err, relay::config::ConfigError::Invalid(_)));
}
