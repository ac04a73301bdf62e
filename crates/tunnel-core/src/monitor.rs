//! Health and metrics snapshotting (spec §4.6).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Bounded ring of recent error records, default capacity per spec §4.6.
pub const DEFAULT_ERROR_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub messages_total: u64,
    pub bytes_transferred: u64,
    pub errors_total: u64,
    pub reconnects_total: u64,
    pub sessions_total: u64,
    pub sessions_active: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthState,
    pub uptime_secs: u64,
    pub metrics: MetricsSnapshot,
    pub errors: Vec<ErrorRecord>,
}

/// Process-wide counters and a rolling error log. Cheap to update from any
/// task (atomics on the hot path, a small mutex only for the error ring).
pub struct Monitor {
    started_at: Instant,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    messages_total: AtomicU64,
    bytes_transferred: AtomicU64,
    errors_total: AtomicU64,
    reconnects_total: AtomicU64,
    sessions_total: AtomicU64,
    sessions_active: AtomicU64,
    errors: Mutex<VecDeque<ErrorRecord>>,
    error_log_capacity: usize,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LOG_CAPACITY)
    }
}

impl Monitor {
    pub fn new(error_log_capacity: usize) -> Self {
        Self {
            started_at: Instant::now(),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_total: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            reconnects_total: AtomicU64::new(0),
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            errors: Mutex::new(VecDeque::with_capacity(error_log_capacity)),
            error_log_capacity,
        }
    }

    pub fn record_connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_session_opened(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, n: u64) {
        self.bytes_transferred.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        let mut log = self.errors.lock().unwrap();
        if log.len() == self.error_log_capacity {
            log.pop_front();
        }
        log.push_back(ErrorRecord {
            message: message.into(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        });
    }

    fn error_rate_per_sec(&self) -> f64 {
        let uptime = self.started_at.elapsed().as_secs_f64().max(1.0);
        self.errors_total.load(Ordering::Relaxed) as f64 / uptime
    }

    /// Derived status per spec §4.6: `degraded` when no agents are active,
    /// `unhealthy` when the error rate exceeds 1/s, `healthy` otherwise.
    pub fn health(&self, active_agents: usize) -> HealthState {
        if active_agents == 0 {
            HealthState::Degraded
        } else if self.error_rate_per_sec() > 1.0 {
            HealthState::Unhealthy
        } else {
            HealthState::Healthy
        }
    }

    pub fn snapshot(&self, active_agents: usize) -> HealthSnapshot {
        let metrics = MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            messages_total: self.messages_total.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            reconnects_total: self.reconnects_total.load(Ordering::Relaxed),
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
        };
        HealthSnapshot {
            status: self.health(active_agents),
            uptime_secs: self.started_at.elapsed().as_secs(),
            metrics,
            errors: self.errors.lock().unwrap().iter().cloned().collect(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
