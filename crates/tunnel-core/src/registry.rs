//! Relay-side agent registry (spec §3 "Agent record", §4.2).
//!
//! Keyed by `agent_id`; re-registration atomically replaces the prior
//! entry, cascading cancellation to every session the prior entry owned
//! (spec §8 "Re-registering with an existing `agentId`...").

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::monitor::Monitor;
use crate::session::{ForwardSink, SessionManager};

/// One connected agent's routing state.
pub struct AgentRecord<S: ForwardSink> {
    pub agent_id: String,
    pub sessions: Arc<SessionManager<S>>,
    sink: S,
    last_liveness_ms: AtomicI64,
    epoch: Instant,
}

impl<S: ForwardSink> AgentRecord<S> {
    fn new(agent_id: String, sink: S, monitor: Arc<Monitor>) -> Self {
        Self {
            agent_id,
            sessions: SessionManager::new(sink.clone(), monitor),
            sink,
            last_liveness_ms: AtomicI64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn touch_liveness(&self) {
        self.last_liveness_ms
            .store(self.epoch.elapsed().as_millis() as i64, Ordering::SeqCst);
    }

    pub fn millis_since_liveness(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64 - self.last_liveness_ms.load(Ordering::SeqCst)
    }
}

/// Registry of currently connected agents.
pub struct AgentRegistry<S: ForwardSink> {
    agents: DashMap<String, Arc<AgentRecord<S>>>,
}

impl<S: ForwardSink> Default for AgentRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ForwardSink> AgentRegistry<S> {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentRecord<S>>> {
        self.agents.get(agent_id).map(|e| e.value().clone())
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    /// Registers `agent_id`, replacing and tearing down any prior record
    /// under the same id (spec §8, §3 "Lifecycle").
    pub fn register(&self, agent_id: String, sink: S, monitor: Arc<Monitor>) -> Arc<AgentRecord<S>> {
        let record = Arc::new(AgentRecord::new(agent_id.clone(), sink, monitor));
        record.touch_liveness();
        if let Some((_, prior)) = self.agents.remove(&agent_id) {
            prior.sessions.shutdown();
        }
        self.agents.insert(agent_id, record.clone());
        record
    }

    /// Removes `agent_id` and cascades cancellation to every session it
    /// owned (control channel loss, spec §3 "Lifecycle", §5).
    pub fn remove(&self, agent_id: &str) {
        if let Some((_, record)) = self.agents.remove(agent_id) {
            record.sessions.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use tunnel_protocol::Forward;

    #[derive(Clone)]
    struct NullSink;
    impl ForwardSink for NullSink {
        fn send_forward(&self, _frame: Forward) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn test_monitor() -> Arc<Monitor> {
        Arc::new(Monitor::default())
    }

    #[test]
    fn register_replaces_prior_entry_under_same_id() {
        let registry: AgentRegistry<NullSink> = AgentRegistry::new();
        let first = registry.register("a1".into(), NullSink, test_monitor());
        assert_eq!(registry.len(), 1);
        let second = registry.register("a1".into(), NullSink, test_monitor());
        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.get("a1").unwrap().agent_id, "a1");
    }

    #[test]
    fn remove_drops_unknown_agent_without_panicking() {
        let registry: AgentRegistry<NullSink> = AgentRegistry::new();
        registry.remove("does-not-exist");
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn liveness_round_trips() {
        let registry: AgentRegistry<NullSink> = AgentRegistry::new();
        let record = registry.register("a1".into(), NullSink, test_monitor());
        record.touch_liveness();
        assert!(record.millis_since_liveness() < 1000);
    }
}
