//! Error kinds shared by the relay and the agent, mapped onto spec §7.

use thiserror::Error;

/// A session-scoped failure: terminates only the one session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("local endpoint read/write failed: {0}")]
    Transport(#[from] std::io::Error),

    #[error("write queue overflowed ({pending} buffers pending)")]
    Backpressure { pending: usize },

    #[error("agent could not dial target: {0}")]
    TargetDial(String),

    #[error("relay did not observe `connected` within {secs}s")]
    ReadinessTimeout { secs: u64 },

    #[error("peer reported an error: {0}")]
    PeerError(String),

    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("session {0} not found")]
    NotFound(String),
}

/// A channel-scoped failure: terminates the whole control channel and
/// cascades to every session it owns.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("authentication failed")]
    AuthFailure,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("outbound queue is full")]
    SendQueueFull,
}

/// A process-scoped failure: fatal before the listener is established.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("port {0} is used by more than one enabled forwarder")]
    DuplicatePort(u16),

    #[error("port {0} is out of the valid range 1..65535")]
    PortOutOfRange(u16),

    #[error("forwarder '{0}' is enabled but has no target")]
    MissingTarget(String),

    #[error("server.token is missing or still a placeholder")]
    MissingToken,

    #[error("server.tls is configured but TLS transport is not implemented")]
    TlsNotSupported,

    #[error("environment variable '{0}' referenced by a placeholder is not set")]
    MissingEnvVar(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
