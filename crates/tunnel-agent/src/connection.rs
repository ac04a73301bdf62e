//! The agent's outbound control-channel loop (spec §4.5): dial the relay,
//! register, pump keepalives, dispatch inbound frames, and reconnect with
//! exponential backoff on any failure.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tunnel_core::backoff::Backoff;
use tunnel_core::channel::{OutboundQueue, DEFAULT_QUEUE_CAPACITY, KEEPALIVE_INTERVAL};
use tunnel_core::monitor::Monitor;
use tunnel_core::session::SessionManager;
use tunnel_protocol::{codec, Forward, Message, DEFAULT_MAX_FRAME_SIZE};

use crate::config::AgentConfig;
use crate::dialer;
use crate::sink::AgentSink;

/// Runs forever: connect, register, serve, and on any failure wait out the
/// backoff delay and try again (spec §4.5, §8 scenario 3 "agent retries
/// with delay=5s, succeeds, and re-registers; no stale sessions remain").
pub async fn run(config: Arc<AgentConfig>, monitor: Arc<Monitor>) -> ! {
    let mut backoff = Backoff::new();
    loop {
        match run_once(&config, &monitor).await {
            Ok(()) => {
                // `run_once` only returns Ok on a clean server-initiated
                // close; still reconnect, but don't treat it as a failure
                // worth escalating the backoff for.
                backoff.reset();
            }
            Err(e) => {
                warn!(error = %e, "control channel lost");
                monitor.record_error(format!("control channel lost: {e}"));
            }
        }
        let delay = backoff.advance();
        info!(delay_secs = delay.as_secs(), "reconnecting");
        tokio::time::sleep(delay).await;
        monitor.record_reconnect();
    }
}

async fn run_once(config: &Arc<AgentConfig>, monitor: &Arc<Monitor>) -> Result<(), String> {
    let mut request = config
        .relay
        .url
        .clone()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", config.relay.token)
            .parse()
            .map_err(|_| "token is not a valid header value".to_string())?,
    );
    request.headers_mut().insert(
        "X-Client-ID",
        config
            .agent_id
            .parse()
            .map_err(|_| "agent_id is not a valid header value".to_string())?,
    );

    let (ws_stream, _) = connect_async(request).await.map_err(|e| e.to_string())?;
    info!(agent_id = %config.agent_id, "connected to relay");
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let (queue, mut outbound_rx) = OutboundQueue::bounded(DEFAULT_QUEUE_CAPACITY);
    let channel_failed = queue.failed();
    let sink = AgentSink::new(queue, monitor.clone());
    let sessions = SessionManager::new(sink.clone(), monitor.clone());

    sink.send_message(Message::Register {
        agent_id: config.agent_id.clone(),
        forwarders: config.forwarder_targets(),
    })
    .map_err(|e| e.to_string())?;

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

    let keepalive_sink = sink.clone();
    let keepalive_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if keepalive_sink.send_message(Message::Ping).is_err() {
                break;
            }
        }
    });

    let result = inbound_loop(config, monitor, &sessions, &mut ws_stream, &channel_failed).await;

    outbound_task.abort();
    keepalive_task.abort();
    sessions.shutdown();
    result
}

async fn inbound_loop(
    config: &Arc<AgentConfig>,
    monitor: &Arc<Monitor>,
    sessions: &Arc<SessionManager<AgentSink>>,
    ws_stream: &mut (impl futures::Stream<
        Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
    > + Unpin),
    channel_failed: &CancellationToken,
) -> Result<(), String> {
    loop {
        let frame = tokio::select! {
            _ = channel_failed.cancelled() => {
                return Err("outbound queue failed".to_string());
            }
            frame = ws_stream.next() => frame,
        };
        let Some(frame) = frame else { return Ok(()) };

        let text = match frame {
            Ok(WsMessage::Text(t)) => t.to_string(),
            Ok(WsMessage::Close(_)) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        };

        let msg = match codec::decode(&text, DEFAULT_MAX_FRAME_SIZE) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame from relay");
                monitor.record_error(format!("malformed frame from relay: {e}"));
                continue;
            }
        };
        monitor.record_message();

        match msg {
            Message::Registered { agent_id } => {
                info!(agent_id, "registered with relay");
            }
            Message::Ping => {
                if let Err(e) = sessions.sink().send_message(Message::Pong) {
                    return Err(e.to_string());
                }
            }
            Message::Pong => {}
            Message::Register { .. } => {
                warn!("relay sent an agent-only frame, ignoring");
            }
            Message::Forward { data } => dispatch_forward(config, sessions, data),
        }
    }
}

fn dispatch_forward(
    config: &Arc<AgentConfig>,
    sessions: &Arc<SessionManager<AgentSink>>,
    frame: Forward,
) {
    let session_id = frame.session_id().to_string();
    match frame {
        Forward::Connect { target, .. } => {
            let sessions = sessions.clone();
            let config = config.clone();
            let agent_id = config.agent_id.clone();
            tokio::spawn(dialer::handle_connect(
                sessions, config, agent_id, session_id, target,
            ));
        }
        Forward::Data { data, .. } => {
            let Some(session) = sessions.get(&session_id) else {
                return;
            };
            match tunnel_protocol::payload::decode(&data) {
                Ok(bytes) => {
                    if let Err(e) = session.write(bytes) {
                        warn!(session_id, error = %e, "dropping session after write failure");
                        sessions.remove(&session_id, true);
                    }
                }
                Err(e) => warn!(session_id, error = %e, "dropping undecodable data frame"),
            }
        }
        Forward::Disconnect { .. } => {
            sessions.remove(&session_id, false);
        }
        Forward::Error { error, .. } => {
            warn!(session_id, error, "relay reported a session error");
            sessions.remove(&session_id, false);
        }
        Forward::Connected { .. } => {
            warn!(session_id, "relay sent an agent-only frame, ignoring");
        }
    }
}
