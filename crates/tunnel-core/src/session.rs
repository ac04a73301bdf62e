//! The per-side session manager (spec §4.2, §4.8).
//!
//! A [`Session`] represents one end-to-end tunneled TCP connection. It is
//! exclusively owned by whichever side's [`SessionManager`] holds the local
//! `TcpStream` (the external connection on the relay, the dialed target on
//! the agent); the other side only ever references the `session_id` inside
//! `forward` frames.
//!
//! Two workers run per session: a local-read worker that turns bytes read
//! from the local socket into outbound `data` frames, and a local-write
//! worker that drains a bounded queue of inbound buffers onto the local
//! socket. Both share one [`CancellationToken`] so tearing down a session
//! stops both within one deadline cycle, per spec §5.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tunnel_protocol::{payload, Forward};

use crate::error::{ChannelError, SessionError};
use crate::monitor::Monitor;

/// Bytes read from the local endpoint per chunk before being framed as a
/// `data` message.
pub const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Idle-read deadline: a local endpoint that produces nothing for this long
/// is considered gone. Renewed on every successful read.
pub const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Per-write deadline on the local endpoint.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(60);

/// Capacity of a session's inbound write queue (spec §4.2 default).
pub const WRITE_QUEUE_CAPACITY: usize = 256;

/// The session state machine, spec §4.8 (relay-side naming; agent-side
/// sessions skip straight to `Established` since by the time one is
/// constructed the target dial already succeeded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Allocated,
    AwaitingReady,
    Established,
    Draining,
    Terminated,
}

/// Anything that can deliver a [`Forward`] frame to the peer. Implemented
/// by the relay's and the agent's outbound control-channel queue.
///
/// A full outbound queue is not swallowed here: it's surfaced as
/// [`ChannelError::SendQueueFull`] so the caller can tear down whatever it
/// owns rather than silently losing bytes (spec §4.1).
pub trait ForwardSink: Clone + Send + Sync + 'static {
    fn send_forward(&self, frame: Forward) -> Result<(), ChannelError>;
}

/// One end-to-end tunneled TCP connection.
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub agent_id: String,
    pub target: String,
    state: std::sync::Mutex<SessionState>,
    closed: AtomicBool,
    cancel: CancellationToken,
    write_tx: mpsc::Sender<Vec<u8>>,
    ready: Notify,
    ready_flag: AtomicBool,
}

impl Session {
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Raised by the relay-side dispatcher once the agent sends `connected`.
    /// No-op if already ready (idempotent, mirrors the terminal-state rule).
    pub fn mark_ready(&self) {
        if !self.ready_flag.swap(true, Ordering::SeqCst) {
            self.set_state(SessionState::Established);
            self.ready.notify_waiters();
        }
    }

    /// Awaits readiness, or returns immediately if already ready.
    pub async fn wait_ready(&self) {
        if self.ready_flag.load(Ordering::SeqCst) {
            return;
        }
        let notified = self.ready.notified();
        if self.ready_flag.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Non-blocking enqueue of peer-originated bytes destined for the local
    /// endpoint. A full queue is fatal to this session only (spec §4.2,
    /// §7 `SessionBackpressure`) and is reported back to the caller so the
    /// session manager can tear the session down.
    pub fn write(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        match self.write_tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SessionError::Backpressure {
                pending: WRITE_QUEUE_CAPACITY,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::NotFound(
                self.session_id.clone(),
            )),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// An indexed collection of sessions, owned by one side of the tunnel.
///
/// `S` is the outbound sink used to emit `data`/`disconnect`/`error` frames
/// toward the peer — the relay and the agent each plug in their own
/// control-channel writer here.
pub struct SessionManager<S: ForwardSink> {
    sessions: DashMap<String, Arc<Session>>,
    sink: S,
    monitor: Arc<Monitor>,
    self_ref: std::sync::Weak<Self>,
}

impl<S: ForwardSink> SessionManager<S> {
    /// Returns an `Arc` rather than `Self` because spawned workers hold a
    /// manager handle of their own; `self_ref` lets [`Self::create`] hand
    /// those out without forcing every caller to thread an `Arc` through
    /// just to call a constructor.
    pub fn new(sink: S, monitor: Arc<Monitor>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            sessions: DashMap::new(),
            sink,
            monitor,
            self_ref: self_ref.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// The outbound sink this manager forwards frames through, exposed so
    /// callers (the relay dispatcher, the agent connection loop) can send
    /// frames that aren't tied to any one session, such as `connect`.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Inserts a new session and starts its local-write worker. If
    /// `start_ready` is true (agent side: the dial already succeeded) the
    /// session starts `Established` and the local-read worker starts too;
    /// otherwise (relay side) it starts `AwaitingReady` and the caller is
    /// responsible for calling [`Session::wait_ready`] before pumping reads
    /// (see `tunnel-relay::dispatcher`).
    ///
    /// Fails with [`SessionError::AlreadyExists`] if the id is already in
    /// use — session ids must never be reused (spec §3 invariants).
    ///
    /// Hands each spawned worker a manager handle (via `self_ref`) so it
    /// can call back into [`SessionManager::remove`] on natural
    /// termination (local EOF, read/write error, idle timeout) — a session
    /// is never left registered after its local side has gone away.
    pub fn create(
        &self,
        session_id: String,
        agent_id: String,
        target: String,
        local_conn: TcpStream,
        start_ready: bool,
    ) -> Result<Arc<Session>, SessionError> {
        if self.sessions.contains_key(&session_id) {
            return Err(SessionError::AlreadyExists(session_id));
        }

        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let session = Arc::new(Session {
            session_id: session_id.clone(),
            agent_id,
            target,
            state: std::sync::Mutex::new(if start_ready {
                SessionState::Established
            } else {
                SessionState::AwaitingReady
            }),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            write_tx,
            ready: Notify::new(),
            ready_flag: AtomicBool::new(start_ready),
        });

        let (read_half, write_half) = local_conn.into_split();
        let handle = self
            .self_ref
            .upgrade()
            .expect("SessionManager always owns a strong ref to itself while in use");

        spawn_local_write_worker(handle.clone(), session.clone(), write_half, write_rx);
        if start_ready {
            spawn_local_read_worker(handle.clone(), session.clone(), read_half);
        } else {
            // Stashed for the dispatcher to hand off once readiness lands;
            // we still own the read half so nothing else can read from it
            // in the meantime.
            spawn_gated_read_worker(handle, session.clone(), read_half);
        }

        self.sessions.insert(session_id, session.clone());
        self.monitor.record_connection_opened();
        self.monitor.record_session_opened();
        Ok(session)
    }

    /// Idempotent destructor. Marks the session closed, cancels its
    /// workers, and best-effort notifies the peer with `disconnect` unless
    /// `notify_peer` is false (used when the teardown was itself caused by
    /// a `disconnect`/`error` frame from that same peer, or when the
    /// control channel itself is the thing that just failed).
    ///
    /// While the disconnect notification is outstanding the session sits in
    /// `Draining` (spec §4.8: `Established --local EOF--> Draining`) before
    /// the final `Terminated` transition.
    pub fn remove(&self, session_id: &str, notify_peer: bool) {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return;
        };
        if session.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if notify_peer {
            session.set_state(SessionState::Draining);
            if let Err(e) = self.sink.send_forward(Forward::Disconnect {
                session_id: session_id.to_string(),
            }) {
                warn!(session_id, error = %e, "failed to notify peer of disconnect");
            }
        }
        session.set_state(SessionState::Terminated);
        session.cancel.cancel();
        self.monitor.record_connection_closed();
        self.monitor.record_session_closed();
        debug!(session_id, "session removed");
    }

    /// Removes every session, used when the control channel is lost
    /// (spec §4.2 `shutdown()`, §5 cascading cancellation).
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove(&id, false);
        }
    }
}

fn spawn_local_write_worker<S: ForwardSink>(
    manager: Arc<SessionManager<S>>,
    session: Arc<Session>,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut write_rx: mpsc::Receiver<Vec<u8>>,
) {
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        let mut natural_end = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_buf = write_rx.recv() => {
                    let Some(buf) = maybe_buf else { break };
                    let result = tokio::time::timeout(WRITE_DEADLINE, write_half.write_all(&buf)).await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(session_id = %session.session_id, error = %e, "local write failed");
                            natural_end = true;
                            break;
                        }
                        Err(_) => {
                            warn!(session_id = %session.session_id, "local write deadline exceeded");
                            natural_end = true;
                            break;
                        }
                    }
                }
            }
        }
        let _ = write_half.shutdown().await;
        if natural_end {
            manager.remove(&session.session_id, true);
        }
    });
}

fn spawn_local_read_worker<S: ForwardSink>(
    manager: Arc<SessionManager<S>>,
    session: Arc<Session>,
    read_half: tokio::net::tcp::OwnedReadHalf,
) {
    tokio::spawn(run_local_read_loop(manager, session, read_half));
}

/// Like [`spawn_local_read_worker`], but waits for readiness before the
/// first read — the relay-side readiness barrier (spec §4.3 step 5, §5
/// "`connected` strictly precedes any `data`").
fn spawn_gated_read_worker<S: ForwardSink>(
    manager: Arc<SessionManager<S>>,
    session: Arc<Session>,
    read_half: tokio::net::tcp::OwnedReadHalf,
) {
    tokio::spawn(async move {
        let cancel = session.cancel_token();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = session.wait_ready() => {}
        }
        run_local_read_loop(manager, session, read_half).await;
    });
}

async fn run_local_read_loop<S: ForwardSink>(
    manager: Arc<SessionManager<S>>,
    session: Arc<Session>,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
) {
    let cancel = session.cancel_token();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut natural_end = false;
    let mut notify_peer = true;
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout(IDLE_READ_TIMEOUT, read_half.read(&mut buf)) => r,
        };
        match read {
            Ok(Ok(0)) => {
                natural_end = true;
                break;
            }
            Ok(Ok(n)) => {
                if let Err(e) = manager.sink().send_forward(Forward::Data {
                    session_id: session.session_id.clone(),
                    data: payload::encode(&buf[..n]),
                }) {
                    // The control channel is the thing that just failed, so
                    // there's no sink left to notify through.
                    warn!(session_id = %session.session_id, error = %e, "control channel rejected forwarded data");
                    natural_end = true;
                    notify_peer = false;
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!(session_id = %session.session_id, error = %e, "local read failed");
                natural_end = true;
                break;
            }
            Err(_) => {
                warn!(session_id = %session.session_id, "local read idle timeout");
                natural_end = true;
                break;
            }
        }
    }
    if natural_end {
        manager.remove(&session.session_id, notify_peer);
    }
}
