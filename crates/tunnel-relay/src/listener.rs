//! Relay port listener and dispatcher (spec §4.3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use tunnel_core::ForwardSink;
use tunnel_protocol::Forward;

use crate::state::AppState;

/// How long the relay waits for `connected` after sending `connect`
/// (spec §4.3 step 5, §7 `ReadinessTimeout`).
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// One `{listenPort, agentId}` pair (spec §3 "Port listener"). Immutable
/// once built; the forwarder name is carried only to resolve the target
/// with the agent's registration-time declaration (spec §4.3 step 3) — it
/// is never used to look up a target in the relay's own config.
pub struct PortListener {
    pub listen_port: u16,
    pub agent_id: String,
    pub forwarder_name: String,
    counter: AtomicU64,
}

impl PortListener {
    pub fn new(listen_port: u16, agent_id: String, forwarder_name: String) -> Self {
        Self {
            listen_port,
            agent_id,
            forwarder_name,
            counter: AtomicU64::new(0),
        }
    }

    /// `<agentId>-<listenPort>-<strictly-increasing counter>` (spec §4.3
    /// step 1): unique within the agent because the counter is a single
    /// writer's monotonic sequence, and never reused across reconnects
    /// because each `PortListener` keeps counting from where it left off.
    fn next_session_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}-{}", self.agent_id, self.listen_port, n)
    }
}

/// Binds the listener's port. Binding happens up front, before any accept
/// loop is spawned, so a required port that's already taken aborts startup
/// synchronously in `main` rather than surfacing as a panic from inside an
/// already-running background task (spec §4.7, §8 "Port in the configured
/// set already bound").
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}

/// Runs one port listener's accept loop forever on an already-bound socket.
pub async fn run_port_listener(
    listener: Arc<PortListener>,
    state: AppState,
    tcp_listener: TcpListener,
) {
    info!(port = listener.listen_port, agent_id = %listener.agent_id, "port listener started");

    loop {
        match tcp_listener.accept().await {
            Ok((stream, peer)) => {
                let listener = listener.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    dispatch(listener, state, stream, peer).await;
                });
            }
            Err(e) => {
                warn!(port = listener.listen_port, error = %e, "accept failed");
            }
        }
    }
}

/// Handles one accepted external TCP connection end-to-end (spec §4.3
/// steps 1-7).
async fn dispatch(
    listener: Arc<PortListener>,
    state: AppState,
    stream: TcpStream,
    peer: std::net::SocketAddr,
) {
    let Some(agent) = state.agents.get(&listener.agent_id) else {
        // "Looks up the agent record; if absent, closes the TCP connection
        // immediately with no frame emitted." (spec §4.3 step 2)
        return;
    };

    let session_id = listener.next_session_id();
    let target = state
        .forwarder_targets
        .get(&listener.agent_id)
        .and_then(|m| m.get(&listener.forwarder_name).cloned())
        .unwrap_or_else(|| listener.forwarder_name.clone());

    info!(session_id = %session_id, %peer, "accepted, dispatching connect");

    // Session/connection counters are tracked by `SessionManager::create`
    // and `SessionManager::remove` themselves, so they stay accurate for
    // the session's full lifetime rather than just this function's.
    let session = match agent.sessions.create(
        session_id.clone(),
        listener.agent_id.clone(),
        target.clone(),
        stream,
        false,
    ) {
        Ok(s) => s,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "session create failed");
            return;
        }
    };

    if let Err(e) = agent.sink().send_forward(Forward::Connect {
        session_id: session_id.clone(),
        target,
    }) {
        warn!(session_id = %session_id, error = %e, "failed to deliver connect, closing");
        agent.sessions.remove(&session_id, false);
        return;
    }

    let ready = tokio::time::timeout(READINESS_TIMEOUT, session.wait_ready()).await;
    if ready.is_err() {
        warn!(session_id = %session_id, "readiness timeout, closing without transmitting data");
        state.monitor.record_error(format!("{session_id}: readiness timeout"));
        agent.sessions.remove(&session_id, true);
    }
}
