//! The agent's outbound sink: wraps the control channel's
//! [`OutboundQueue`] the same way `tunnel-relay`'s `RelaySink` does.

use std::sync::Arc;

use tunnel_core::channel::OutboundQueue;
use tunnel_core::error::ChannelError;
use tunnel_core::monitor::Monitor;
use tunnel_core::session::ForwardSink;
use tunnel_protocol::{Forward, Message};

#[derive(Clone)]
pub struct AgentSink {
    queue: OutboundQueue,
    monitor: Arc<Monitor>,
}

impl AgentSink {
    pub fn new(queue: OutboundQueue, monitor: Arc<Monitor>) -> Self {
        Self { queue, monitor }
    }

    /// A full queue is returned to the caller rather than swallowed (spec
    /// §4.1): this control channel needs to come down, not just drop one
    /// message.
    pub fn send_message(&self, msg: Message) -> Result<(), ChannelError> {
        self.queue.try_send(msg).inspect_err(|e| {
            tracing::warn!(error = %e, "outbound queue full");
            self.monitor.record_error(format!("outbound queue full: {e}"));
        })?;
        self.monitor.record_message();
        Ok(())
    }
}

impl ForwardSink for AgentSink {
    fn send_forward(&self, frame: Forward) -> Result<(), ChannelError> {
        self.send_message(Message::forward(frame))
    }
}
