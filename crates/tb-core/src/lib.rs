//! # tb-core
//!
//! Core crate for tickerbridge, providing:
//!
//! - **Types** (`types`): frames, connection state, subscription spec
//! - **Configuration** (`config`): JSON config deserialization + validation
//! - **Error types** (`error`): domain-specific `TbError` and `FeedError` via thiserror
//! - **WebSocket** (`ws`): the reconnecting feed connection
//! - **Backoff** (`backoff`): exponential retry delays with jitter
//! - **Sequence tracking** (`sequence`): gap and duplicate detection
//! - **Latency** (`latency`): histogram-based latency statistics
//! - **Shutdown** (`shutdown`): the shared cancellation signal
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod backoff;
pub mod config;
pub mod error;
pub mod latency;
pub mod logging;
pub mod sequence;
pub mod shutdown;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
