use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for connection and frame handling.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Sockets accepted
    pub connections_accepted: AtomicU64,
    /// Handshakes that produced a session
    pub handshakes_completed: AtomicU64,
    /// Connections closed before a session existed
    pub handshakes_failed: AtomicU64,
    /// Frames read from active sessions
    pub frames_received: AtomicU64,
    /// Requests handed to dispatch
    pub dispatched: AtomicU64,
    /// Frames dropped for a bad signature or unknown sender
    pub signature_failures: AtomicU64,
    /// Frames that were not ciphertext for this server
    pub decryption_failures: AtomicU64,
    /// Sessions ended
    pub disconnects: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            signature_failures: self.signature_failures.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub handshakes_completed: u64,
    pub handshakes_failed: u64,
    pub frames_received: u64,
    pub dispatched: u64,
    pub signature_failures: u64,
    pub decryption_failures: u64,
    pub disconnects: u64,
}
