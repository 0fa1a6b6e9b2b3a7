// relay: Bridges HTTP/WebSocket JSON-RPC clients to stdio ACP agents.

use clap::{Arg, Command};
use std::path::Path;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "relay starting");

    let matches = Command::new("ACP Relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relays JSON-RPC between network clients and a stdio ACP agent")
        .arg(
            Arg::new("config")
                .help("Path to the relay TOML config")
                .short('c')
                .long("config")
                .value_name("path")
                .default_value(relay::config::DEFAULT_CONFIG_PATH),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .expect("config has a default");

    let config = match relay::config::load_config(Path::new(config_path)) {
        Ok(config) => {
            info!(
                agent = %config.agent.command.join(" "),
                sandbox = config.sandbox.enabled,
                journal = %config.journal.path.display(),
                "config loaded"
            );
            config
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = relay::serve(config).await {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }
}
