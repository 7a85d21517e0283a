//! Counters shared between the feed driver task and observers.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Live counters for one [`FeedConnection`](super::FeedConnection).
///
/// Written only by the driver task; read by anyone through [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct FeedStats {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    disconnects: AtomicU64,
    sessions: AtomicU64,
    heartbeat_timeouts: AtomicU64,
    decode_errors: AtomicU64,
    frames: AtomicU64,
    last_seq: AtomicU64,
    backoff_attempt: AtomicU32,
}

/// Point-in-time copy of [`FeedStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStatsSnapshot {
    /// Dials started.
    pub connect_attempts: u64,
    /// Dials or subscriptions that failed before reaching `Streaming`.
    pub connect_failures: u64,
    /// Streaming sessions that ended without a shutdown request.
    pub disconnects: u64,
    /// Successful transitions to `Streaming` (each one resets the backoff).
    pub sessions: u64,
    pub heartbeat_timeouts: u64,
    /// Data messages discarded as undecodable.
    pub decode_errors: u64,
    /// Frames handed to the consumer.
    pub frames: u64,
    /// Last sequence number assigned (0 before the first message).
    pub last_seq: u64,
    /// Current backoff attempt counter.
    pub backoff_attempt: u32,
}

impl FeedStats {
    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            last_seq: self.last_seq.load(Ordering::Relaxed),
            backoff_attempt: self.backoff_attempt.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn on_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_connect_failure(&self, backoff_attempt: u32) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
        self.backoff_attempt.store(backoff_attempt, Ordering::Relaxed);
    }

    pub(crate) fn on_disconnect(&self, backoff_attempt: u32) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        self.backoff_attempt.store(backoff_attempt, Ordering::Relaxed);
    }

    pub(crate) fn on_streaming(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        self.backoff_attempt.store(0, Ordering::Relaxed);
    }

    pub(crate) fn on_heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_seq_assigned(&self, seq: u64) {
        self.last_seq.store(seq, Ordering::Relaxed);
    }

    pub(crate) fn on_frame_delivered(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}
