//! HTTP surface of the relay (spec §6): the `/tunnel` control-channel
//! upgrade, `GET /health`, and `GET /api/agents`.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use tunnel_core::auth::tokens_match;
use tunnel_core::channel::{OutboundQueue, DEFAULT_QUEUE_CAPACITY, KEEPALIVE_INTERVAL};
use tunnel_core::monitor::HealthState;
use tunnel_protocol::{codec, Forward, Message, DEFAULT_MAX_FRAME_SIZE};

use crate::state::{AppState, RelaySink};

/// `GET /tunnel` — validates the credential and identity headers, then
/// upgrades to the duplex control channel (spec §6 "Transport").
pub async fn tunnel_handler(
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(agent_id) = headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return (StatusCode::UNAUTHORIZED, "missing X-Client-ID").into_response();
    };

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !tokens_match(&state.config.server.token, presented) {
        warn!(agent_id, "rejected control channel upgrade: bad credential");
        return (StatusCode::UNAUTHORIZED, "invalid credential").into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state, agent_id))
}

/// Runs one agent's control channel end-to-end: registration, the outbound
/// writer task, the keepalive ticker, and the inbound dispatch loop. Runs
/// until the socket closes or a protocol violation is observed, then tears
/// down the agent record (cascading to every session it owns).
async fn handle_connection(socket: WebSocket, state: AppState, agent_id: String) {
    info!(agent_id, "control channel upgraded");
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (queue, mut outbound_rx) = OutboundQueue::bounded(DEFAULT_QUEUE_CAPACITY);
    let channel_failed = queue.failed();
    let sink = RelaySink::new(queue, agent_id.clone(), state.monitor.clone());
    let agent = state
        .agents
        .register(agent_id.clone(), sink, state.monitor.clone());
    agent.touch_liveness();

    // ── Outbound writer task ──
    // The sole writer onto the socket; every other task reaches the peer
    // only through `outbound_rx`.
    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let text = match codec::encode(&msg, DEFAULT_MAX_FRAME_SIZE) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "dropping outbound frame that failed to encode");
                    continue;
                }
            };
            if ws_sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // ── Keepalive ticker ──
    // Sends the application-layer `ping` every 30 s (spec §4.1, §4.5);
    // transport-level ping/pong is handled by axum beneath us.
    let ping_tx = agent.sink().clone();
    let keepalive_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            if ping_tx.send_message(Message::Ping).is_err() {
                break;
            }
        }
    });

    // ── Inbound dispatch loop ──
    // Selects on `channel_failed` alongside inbound frames so a
    // `SendQueueFull` raised from an unrelated task (a session's local-read
    // worker forwarding `data`, the keepalive ticker above) tears this
    // control channel down too, not just whichever call happened to hit it
    // (spec §4.1 "a write error terminates the channel").
    loop {
        let frame = tokio::select! {
            _ = channel_failed.cancelled() => {
                warn!(agent_id, "outbound queue failed, closing control channel");
                break;
            }
            frame = ws_stream.next() => frame,
        };
        let Some(frame) = frame else { break };

        let text = match frame {
            Ok(WsMessage::Text(t)) => t.to_string(),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(agent_id, error = %e, "control channel transport error");
                break;
            }
        };

        agent.touch_liveness();
        let msg = match codec::decode(&text, DEFAULT_MAX_FRAME_SIZE) {
            Ok(m) => m,
            Err(e) => {
                warn!(agent_id, error = %e, "dropping malformed frame");
                state.monitor.record_error(format!("{agent_id}: {e}"));
                continue;
            }
        };
        state.monitor.record_message();
        dispatch_inbound(&state, &agent_id, msg);
    }

    outbound_task.abort();
    keepalive_task.abort();
    state.agents.remove(&agent_id);
    state.forwarder_targets.remove(&agent_id);
    info!(agent_id, "control channel closed");
}

fn dispatch_inbound(state: &AppState, agent_id: &str, msg: Message) {
    match msg {
        Message::Register {
            agent_id: declared,
            forwarders,
        } => {
            if declared != agent_id {
                warn!(
                    agent_id,
                    declared, "register agent_id does not match X-Client-ID, ignoring"
                );
                return;
            }
            state
                .forwarder_targets
                .insert(agent_id.to_string(), forwarders);
            if let Some(agent) = state.agents.get(agent_id) {
                if let Err(e) = agent.sink().send_message(Message::Registered {
                    agent_id: agent_id.to_string(),
                }) {
                    warn!(agent_id, error = %e, "failed to ack registration");
                }
            }
        }
        Message::Ping => {
            if let Some(agent) = state.agents.get(agent_id) {
                if let Err(e) = agent.sink().send_message(Message::Pong) {
                    warn!(agent_id, error = %e, "failed to reply to ping");
                }
            }
        }
        Message::Pong => {
            // Liveness was already touched by the caller on any inbound frame.
        }
        Message::Registered { .. } => {
            warn!(agent_id, "agent sent a relay-only frame, ignoring");
        }
        Message::Forward { data } => dispatch_forward(state, agent_id, data),
    }
}

fn dispatch_forward(state: &AppState, agent_id: &str, frame: Forward) {
    let Some(agent) = state.agents.get(agent_id) else {
        return;
    };
    let session_id = frame.session_id().to_string();
    match frame {
        Forward::Connected { .. } => {
            let Some(session) = agent.sessions.get(&session_id) else {
                warn!(session_id, "connected for unknown session, dropping");
                return;
            };
            session.mark_ready();
        }
        Forward::Data { data, .. } => {
            let Some(session) = agent.sessions.get(&session_id) else {
                return;
            };
            match tunnel_protocol::payload::decode(&data) {
                Ok(bytes) => {
                    state.monitor.record_bytes(bytes.len() as u64);
                    if let Err(e) = session.write(bytes) {
                        warn!(session_id, error = %e, "dropping session after write failure");
                        agent.sessions.remove(&session_id, true);
                    }
                }
                Err(e) => {
                    warn!(session_id, error = %e, "dropping undecodable data frame");
                }
            }
        }
        Forward::Disconnect { .. } => {
            agent.sessions.remove(&session_id, false);
        }
        Forward::Error { error, .. } => {
            warn!(session_id, error, "agent reported a session error");
            state
                .monitor
                .record_error(format!("{session_id}: {error}"));
            agent.sessions.remove(&session_id, false);
        }
        Forward::Connect { .. } => {
            warn!(session_id, "agent sent a relay-only frame, ignoring");
        }
    }
}

#[derive(Serialize)]
struct AgentListItem {
    agent_id: String,
    forwarders: Vec<String>,
    active_sessions: usize,
    millis_since_liveness: i64,
}

/// `GET /api/agents` — lists currently connected agents and their declared
/// forwarders, for operational visibility (not required by spec §6, kept
/// alongside the health endpoint it already exposes counters through).
pub async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    let items: Vec<AgentListItem> = state
        .agents
        .agent_ids()
        .into_iter()
        .filter_map(|agent_id| {
            let record = state.agents.get(&agent_id)?;
            let forwarders = state
                .forwarder_targets
                .get(&agent_id)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            Some(AgentListItem {
                agent_id,
                forwarders,
                active_sessions: record.sessions.len(),
                millis_since_liveness: record.millis_since_liveness(),
            })
        })
        .collect();
    Json(items)
}

#[derive(Serialize)]
struct HealthResponse {
    status: HealthState,
    implementation: &'static str,
    uptime: u64,
    metrics: tunnel_core::monitor::MetricsSnapshot,
    clients: Vec<String>,
    sessions: Vec<String>,
    errors: Vec<tunnel_core::monitor::ErrorRecord>,
}

/// `GET /health` (spec §6 "Health endpoint").
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let active_agents = state.agents.len();
    let snapshot = state.monitor.snapshot(active_agents);
    let clients = state.agents.agent_ids();
    let sessions = clients
        .iter()
        .filter_map(|id| state.agents.get(id))
        .flat_map(|record| {
            record
                .sessions
                .session_ids()
                .into_iter()
                .collect::<Vec<_>>()
        })
        .collect();

    let body = HealthResponse {
        status: snapshot.status,
        implementation: "tunnel-relay",
        uptime: snapshot.uptime_secs,
        metrics: snapshot.metrics,
        clients,
        sessions,
        errors: snapshot.errors,
    };

    let code = match body.status {
        HealthState::Healthy => StatusCode::OK,
        HealthState::Degraded | HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(body))
}
