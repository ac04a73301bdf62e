//! # Tunnel Relay
//!
//! The internet-facing half of the reverse tunnel. Accepts agent control
//! channels over an authenticated WebSocket upgrade, and runs one TCP port
//! listener per enabled forwarder, converting each accepted connection into
//! a session multiplexed over its owning agent's control channel.
//!
//! ## Modules
//!
//! - [`tunnel_relay::http`] — the `/tunnel` upgrade, `/health`, `/api/agents`
//! - [`tunnel_relay::listener`] — port listeners and the connection dispatcher
//! - [`tunnel_relay::state`] — shared application state

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use tunnel_core::config::Config;
use tunnel_relay::listener::{self, PortListener};
use tunnel_relay::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_relay=info".into()),
        )
        .init();

    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("usage: tunnel-relay <config-file>");
        std::process::exit(1);
    };

    let config = match Config::load(config_path.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let state = AppState::new(config);

    // Bind every required listener up front; a bind failure that isn't
    // `warnOnFail` aborts the process before anything is accepting
    // connections (spec §4.7, §6 "Exit and logging").
    let mut bound = Vec::new();
    for fwd in state.config.enabled_forwarders() {
        match listener::bind(fwd.port).await {
            Ok(tcp_listener) => {
                let port_listener = Arc::new(PortListener::new(
                    fwd.port,
                    fwd.client_id.clone(),
                    fwd.name.clone(),
                ));
                bound.push((port_listener, tcp_listener));
            }
            Err(e) => {
                if fwd.warn_on_fail {
                    error!(port = fwd.port, error = %e, "bind failed, forwarder disabled for this run");
                } else {
                    error!(port = fwd.port, error = %e, "bind failed for required forwarder, aborting startup");
                    std::process::exit(1);
                }
            }
        }
    }

    for (port_listener, tcp_listener) in bound {
        let state = state.clone();
        tokio::spawn(listener::run_port_listener(
            port_listener,
            state,
            tcp_listener,
        ));
    }

    let app = Router::new()
        .route("/tunnel", get(tunnel_relay::http::tunnel_handler))
        .route("/health", get(tunnel_relay::http::health_handler))
        .route("/api/agents", get(tunnel_relay::http::list_agents))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let listen_addr = normalize_listen_addr(&state.config.server.listen);
    info!(addr = %listen_addr, "tunnel-relay listening");
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .unwrap_or_else(|e| {
            error!(addr = %listen_addr, error = %e, "failed to bind the control-channel listener");
            std::process::exit(1);
        });
    axum::serve(listener, app).await.unwrap();
}

/// `server.listen` follows the ":PORT" shorthand common to this config
/// schema (spec §6); expand it to a bindable address.
fn normalize_listen_addr(listen: &str) -> String {
    if let Some(port) = listen.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        listen.to_string()
    }
}
