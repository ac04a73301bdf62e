//! Shared control-channel building blocks (spec §4.1): the bounded,
//! single-consumer outbound queue and the keepalive liveness tracker. The
//! actual transport (axum WebSocket on the relay, `tokio-tungstenite` on
//! the agent) lives in the respective binary crates; this is the part that
//! doesn't differ between them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tunnel_protocol::Message;

use crate::error::ChannelError;

/// Default outbound queue capacity (spec §4.1).
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Application-layer keepalive cadence.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A missed deadline after this many keepalive intervals declares the peer
/// dead (spec §4.5: "two pong intervals pass without observation").
pub const KEEPALIVE_MISSED_INTERVALS: u32 = 2;

/// Multi-producer handle onto a control channel's single writer task. A
/// full queue is a [`ChannelError::SendQueueFull`] surfaced to the caller,
/// never a silent drop (spec §4.1), and also trips [`Self::failed`] so every
/// task sharing this queue — not just the one that hit the full buffer —
/// learns the channel needs to come down (spec §4.1 "a write error
/// terminates the channel").
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Message>,
    failed: CancellationToken,
}

impl OutboundQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                failed: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn try_send(&self, msg: Message) -> Result<(), ChannelError> {
        self.tx.try_send(msg).map_err(|_| {
            self.failed.cancel();
            ChannelError::SendQueueFull
        })
    }

    /// Fires the first time a send on this queue fails. Whoever owns the
    /// control channel's read loop selects on this alongside inbound frames
    /// so a failure raised from an unrelated task (a session's local-read
    /// worker forwarding `data`, a keepalive tick) still tears the whole
    /// channel down promptly.
    pub fn failed(&self) -> CancellationToken {
        self.failed.clone()
    }
}

/// Tracks the last time liveness was observed on a control channel (either
/// an application `pong`, a transport-level pong, or any inbound frame).
pub struct Liveness {
    last_seen: std::sync::Mutex<Instant>,
    dead: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            last_seen: std::sync::Mutex::new(Instant::now()),
            dead: AtomicBool::new(false),
        }
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap() = Instant::now();
    }

    /// True once more than `KEEPALIVE_MISSED_INTERVALS * KEEPALIVE_INTERVAL`
    /// has elapsed since the last observed liveness signal.
    pub fn is_stale(&self) -> bool {
        if self.dead.load(Ordering::SeqCst) {
            return true;
        }
        let elapsed = self.last_seen.lock().unwrap().elapsed();
        elapsed > KEEPALIVE_INTERVAL * KEEPALIVE_MISSED_INTERVALS
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_surfaces_as_an_error_not_a_drop() {
        let (queue, mut rx) = OutboundQueue::bounded(1);
        let failed = queue.failed();
        queue.try_send(Message::Ping).unwrap();
        assert!(!failed.is_cancelled());
        let err = queue.try_send(Message::Ping).unwrap_err();
        assert!(matches!(err, ChannelError::SendQueueFull));
        assert!(failed.is_cancelled(), "a full queue must trip the failed signal");
        // the first message is still there, untouched
        assert!(matches!(rx.try_recv().unwrap(), Message::Ping));
    }

    #[test]
    fn freshly_touched_liveness_is_not_stale() {
        let liveness = Liveness::new();
        liveness.touch();
        assert!(!liveness.is_stale());
    }

    #[test]
    fn marked_dead_liveness_is_always_stale() {
        let liveness = Liveness::new();
        liveness.mark_dead();
        assert!(liveness.is_stale());
    }
}
