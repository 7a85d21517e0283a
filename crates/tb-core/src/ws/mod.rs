//! Reconnecting WebSocket feed connection.

pub mod connection;
pub mod envelope;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod proxy;
pub mod stats;

pub use connection::{FeedConnection, FrameStream};
pub use envelope::{Envelope, Response};
pub use stats::{FeedStats, FeedStatsSnapshot};
