//! Drives the relay's REST surface (`/health`, `/api/agents`) directly
//! through its handlers with a real [`AppState`], the way a caller behind
//! the router would see them, without needing a bound TCP listener.

use axum::body::to_bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::Value;

use tunnel_core::channel::OutboundQueue;
use tunnel_core::config::{Config, ForwarderConfig, ServerConfig};
use tunnel_relay::http::{health_handler, list_agents};
use tunnel_relay::state::{AppState, RelaySink};

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            listen: ":8443".into(),
            token: "s3cret".into(),
            tls: None,
            use_improved: false,
        },
        forwarders: vec![ForwarderConfig {
            name: "web".into(),
            port: 18080,
            target: "webapp:80".into(),
            client_id: "a-web".into(),
            enabled: true,
            warn_on_fail: false,
            description: String::new(),
        }],
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_degraded_with_no_agents_connected() {
    let state = AppState::new(test_config());
    let response = health_handler(State(state)).await.into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["implementation"], "tunnel-relay");
}

#[tokio::test]
async fn health_is_healthy_once_an_agent_is_registered() {
    let state = AppState::new(test_config());
    let (queue, _rx) = OutboundQueue::bounded(8);
    let sink = RelaySink::new(queue, "a-web".into(), state.monitor.clone());
    state
        .agents
        .register("a-web".into(), sink, state.monitor.clone());

    let response = health_handler(State(state)).await.into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["clients"], serde_json::json!(["a-web"]));
}

#[tokio::test]
async fn api_agents_reports_declared_forwarders_and_session_count() {
    let state = AppState::new(test_config());
    let (queue, _rx) = OutboundQueue::bounded(8);
    let sink = RelaySink::new(queue, "a-web".into(), state.monitor.clone());
    state
        .agents
        .register("a-web".into(), sink, state.monitor.clone());

    let mut forwarders = std::collections::BTreeMap::new();
    forwarders.insert("web".to_string(), "webapp:80".to_string());
    state.forwarder_targets.insert("a-web".to_string(), forwarders);

    let response = list_agents(State(state)).await.into_response();
    let json = body_json(response).await;
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["agent_id"], "a-web");
    assert_eq!(entries[0]["forwarders"], serde_json::json!(["web"]));
    assert_eq!(entries[0]["active_sessions"], 0);
}
