//! Shared application state for the relay (spec §3 "Agent record", §4.6).

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use tunnel_core::channel::OutboundQueue;
use tunnel_core::config::Config;
use tunnel_core::error::ChannelError;
use tunnel_core::monitor::Monitor;
use tunnel_core::registry::AgentRegistry;
use tunnel_core::session::ForwardSink;
use tunnel_protocol::{Forward, Message};

/// Wraps an agent's [`OutboundQueue`] so the session manager can hand it
/// `Forward` frames without knowing about the `Message` envelope or the
/// channel transport underneath.
#[derive(Clone)]
pub struct RelaySink {
    queue: OutboundQueue,
    agent_id: String,
    monitor: Arc<Monitor>,
}

impl RelaySink {
    pub fn new(queue: OutboundQueue, agent_id: String, monitor: Arc<Monitor>) -> Self {
        Self {
            queue,
            agent_id,
            monitor,
        }
    }

    /// Sends a whole control-channel [`Message`] (`registered`/`ping`/`pong`)
    /// rather than a `Forward`-wrapped session frame. A full queue is
    /// returned to the caller rather than swallowed (spec §4.1): the queue
    /// being full means this control channel is in trouble and whoever owns
    /// its read loop needs to know, not just this one call site.
    pub fn send_message(&self, msg: Message) -> Result<(), ChannelError> {
        self.queue.try_send(msg).inspect_err(|e| {
            tracing::warn!(agent_id = %self.agent_id, error = %e, "outbound queue full");
            self.monitor.record_error(format!(
                "agent {}: outbound queue full: {e}",
                self.agent_id
            ));
        })?;
        self.monitor.record_message();
        Ok(())
    }
}

impl ForwardSink for RelaySink {
    fn send_forward(&self, frame: Forward) -> Result<(), ChannelError> {
        self.queue.try_send(Message::forward(frame)).inspect_err(|e| {
            tracing::warn!(agent_id = %self.agent_id, error = %e, "outbound queue full");
            self.monitor.record_error(format!(
                "agent {}: outbound queue full: {e}",
                self.agent_id
            ));
        })?;
        self.monitor.record_message();
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub agents: Arc<AgentRegistry<RelaySink>>,
    pub monitor: Arc<Monitor>,
    pub config: Arc<Config>,
    pub started_at: std::time::Instant,

    /// The forwarders each connected agent declared at registration time
    /// (`agent_id` → `forwarder name` → `target`). Populated from
    /// `Message::Register`; consulted by the port dispatcher instead of
    /// `config` so the relay never resolves a target out of its own
    /// static configuration (spec §4.3 step 3, §9).
    pub forwarder_targets: Arc<DashMap<String, BTreeMap<String, String>>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            agents: Arc::new(AgentRegistry::new()),
            monitor: Arc::new(Monitor::default()),
            config: Arc::new(config),
            started_at: std::time::Instant::now(),
            forwarder_targets: Arc::new(DashMap::new()),
        }
    }
}
