//! Typed error definitions for tickerbridge.
//!
//! [`TbError`] covers startup failures that are allowed to stop the process.
//! [`FeedError`] covers everything that can go wrong on the upstream socket;
//! those never escape the feed's retry loop.

use std::time::Duration;

use thiserror::Error;

/// Startup / configuration errors.
#[derive(Debug, Error)]
pub enum TbError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Subscription spec rejected before any connection was made.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// `FeedConnection::start` was called on a connection that already runs.
    #[error("feed connection already started")]
    AlreadyStarted,
}

/// Upstream feed errors. All of them are retried by the connection loop,
/// except [`FeedError::Decode`] which only discards one frame.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Endpoint unreachable, handshake failed, or connect timed out.
    #[error("dial failed: {0}")]
    Dial(String),

    /// Upstream rejected or never acknowledged the subscription request.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// No inbound traffic within the liveness window.
    #[error("no traffic for {0:?}")]
    HeartbeatTimeout(Duration),

    /// A received data message is not a valid envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// Socket read or write failed while streaming.
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote side closed the stream.
    #[error("connection closed: {0}")]
    Closed(String),
}
