//! Agent forwarder and dialer (spec §4.4): turns an inbound `connect`
//! frame into a dialed local TCP connection and a `connected`/`error`
//! reply, then hands the stream to the agent-side session manager.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{info, warn};

use tunnel_core::session::SessionManager;
use tunnel_core::ForwardSink;
use tunnel_protocol::Forward;

use crate::config::AgentConfig;
use crate::sink::AgentSink;

/// Connect-timeout budget for a single dial attempt (spec §4.4 step 1:
/// "Dial `target` with a 10-s connect timeout"). There is no retry on this
/// path — one attempt, one reply, fail fast.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves `target` against the agent's own forwarder table when the
/// relay only sent back a bare forwarder name (spec §4.3 step 3
/// resolution: the control channel carried the real target at
/// registration, so a literal `host:port` already arrives here too —
/// this only matters when the agent originally omitted that forwarder
/// from its `register.forwarders` map).
fn resolve_target<'a>(config: &'a AgentConfig, declared: &'a str) -> &'a str {
    config.target_for(declared).unwrap_or(declared)
}

/// Handles one `connect` frame end-to-end: a single dial attempt against
/// the target under a 10-s timeout, reply `connected` on success or
/// `error` on failure, and (on success) insert the dialed connection into
/// the session manager so its workers start pumping bytes immediately
/// (spec §3 "Session (agent side): created on receipt of `connect`").
pub async fn handle_connect(
    sessions: Arc<SessionManager<AgentSink>>,
    config: Arc<AgentConfig>,
    agent_id: String,
    session_id: String,
    declared_target: String,
) {
    let target = resolve_target(&config, &declared_target).to_string();

    let dial = match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&target)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("connect to {target} timed out after {DIAL_TIMEOUT:?}")),
    };

    let stream = match dial {
        Ok(s) => s,
        Err(e) => {
            warn!(session_id, target, error = %e, "dial failed");
            if let Err(e) = sessions.sink().send_forward(Forward::Error {
                session_id,
                error: e,
            }) {
                warn!(error = %e, "failed to report dial failure to relay");
            }
            return;
        }
    };

    info!(session_id, target, "dialed target, session established");
    match sessions.create(session_id.clone(), agent_id, target, stream, true) {
        Ok(_) => {
            if let Err(e) = sessions.sink().send_forward(Forward::Connected { session_id }) {
                warn!(error = %e, "failed to report successful dial to relay");
            }
        }
        Err(e) => {
            warn!(session_id, error = %e, "session create failed after successful dial");
            if let Err(e) = sessions.sink().send_forward(Forward::Error {
                session_id,
                error: e.to_string(),
            }) {
                warn!(error = %e, "failed to report session-create failure to relay");
            }
        }
    }
}
