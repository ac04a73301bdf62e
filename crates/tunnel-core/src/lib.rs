//! Shared concurrency primitives and the configuration model used by both
//! `tunnel-relay` and `tunnel-agent`: the session manager, agent registry,
//! reconnect backoff, retry policy, circuit breaker, health monitor,
//! keepalive/outbound-queue building blocks, and config validation.

pub mod auth;
pub mod backoff;
pub mod channel;
pub mod circuit;
pub mod config;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod retry;
pub mod session;

pub use config::Config;
pub use error::{ChannelError, ConfigError, SessionError};
pub use monitor::Monitor;
pub use registry::AgentRegistry;
pub use session::{ForwardSink, Session, SessionManager, SessionState};
