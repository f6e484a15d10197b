//! chainwire node: runs the P2P transport core as a service.
//!
//! The node owns the process-scoped pieces the network crate leaves to its
//! caller:
//! - TCP dialing and listening ([`ConnectionManager`])
//! - routing of decoded messages to the assembler or the event bus
//! - execution of handler actions
//! - the tick timer driving keepalive, ban expiry and assembly expiry
//! - configuration, logging, metrics and shutdown

pub mod config;
pub mod connection_manager;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;

pub use config::NodeConfig;
pub use connection_manager::{spawn_dispatcher, ConnectionManager};
pub use context::NodeContext;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::Node;
pub use shutdown::ShutdownController;
