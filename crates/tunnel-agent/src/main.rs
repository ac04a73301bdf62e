//! # Tunnel Agent
//!
//! The air-gapped half of the reverse tunnel. Dials the relay outbound
//! over an authenticated WebSocket, registers its forwarders, and dials
//! local targets whenever the relay asks it to open a session.
//!
//! ## Modules
//!
//! - [`tunnel_agent::config`] — the agent's configuration model
//! - [`tunnel_agent::connection`] — the reconnecting control-channel loop
//! - [`tunnel_agent::dialer`] — turns a `connect` frame into a dialed session
//! - [`tunnel_agent::sink`] — the outbound queue wrapper

use std::sync::Arc;

use tracing::error;

use tunnel_agent::config::AgentConfig;
use tunnel_agent::connection;
use tunnel_core::monitor::Monitor;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_agent=info".into()),
        )
        .init();

    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("usage: tunnel-agent <config-file>");
        std::process::exit(1);
    };

    let config = match AgentConfig::load(config_path.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let monitor = Arc::new(Monitor::default());
    connection::run(Arc::new(config), monitor).await;
}
