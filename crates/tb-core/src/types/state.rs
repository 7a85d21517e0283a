//! Lifecycle state of the logical upstream connection.

/// State of a [`FeedConnection`](crate::ws::FeedConnection).
///
/// Only the connection's driver task writes this value, so transitions are
/// serialized. `Streaming` is the only state in which the socket is known to
/// be live and subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Subscribing => write!(f, "subscribing"),
            Self::Streaming => write!(f, "streaming"),
            Self::Closing => write!(f, "closing"),
        }
    }
}
