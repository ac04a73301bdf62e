//! Internet-facing half of the reverse tunnel: accepts agent control
//! channels at `/tunnel`, exposes `/health` and `/api/agents`, and runs one
//! TCP port listener per enabled forwarder.
//!
//! - [`http`] — the control-channel upgrade and the two REST endpoints.
//! - [`listener`] — port listeners and the per-connection dispatcher.
//! - [`state`] — the shared [`state::AppState`] and its [`state::RelaySink`].

pub mod http;
pub mod listener;
pub mod state;
