//! Nullable infrastructure for deterministic testing.
//!
//! External dependencies (clock, remote peers, storage) sit behind traits or
//! plain sockets, and this crate provides test-friendly stand-ins that
//! - return deterministic values
//! - can be controlled programmatically
//! - never touch the filesystem or the real network
//!
//! It also carries transform stages that only make sense in tests.

pub mod clock;
pub mod network;
pub mod stages;
pub mod store;

pub use clock::NullClock;
pub use network::NullPeer;
pub use stages::{DelayStage, RecordingStage};
pub use store::NullStore;
