//! Core data types: frames, connection state, subscription spec.

pub mod frame;
pub mod state;
pub mod subscription;

pub use frame::*;
pub use state::*;
pub use subscription::*;
