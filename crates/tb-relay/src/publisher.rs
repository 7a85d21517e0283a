//! The outbound side of the relay: something that accepts one frame at a time.

use std::time::Duration;

use async_trait::async_trait;
use tb_core::Frame;
use thiserror::Error;

/// Confirmation that the bus accepted a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Subscribers the bus reported delivering to. Zero is still a success.
    pub receivers: u64,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("bus connection failed: {0}")]
    Connect(String),

    #[error("bus rejected publish: {0}")]
    Rejected(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// A message bus the pump publishes to.
///
/// Only `Send` is required: the pump owns its publisher and calls it from
/// one task, one frame at a time.
#[async_trait]
pub trait Publisher: Send {
    /// Publish one frame's payload. Connects lazily if needed.
    async fn publish(&mut self, frame: &Frame) -> Result<Ack, PublishError>;
}
