//! # tb-relay
//!
//! The relay half of tickerbridge: takes the frame stream of a
//! [`FeedConnection`](tb_core::ws::FeedConnection) and republishes every
//! frame, unchanged and in order, on a Redis pub/sub channel.
//!
//! - [`publisher`]: the `Publisher` trait the pump writes to
//! - [`redis_bus`]: Redis `PUBLISH` implementation
//! - [`pump`]: retrying, gap-detecting frame pump
//! - [`supervisor`]: feed + pump lifecycle

#[cfg(test)]
mod memory;
pub mod publisher;
pub mod pump;
pub mod redis_bus;
pub mod supervisor;

pub use publisher::{Ack, Publisher, PublishError};
pub use pump::{PumpReport, RelayPump};
pub use redis_bus::RedisPublisher;
pub use supervisor::Supervisor;
