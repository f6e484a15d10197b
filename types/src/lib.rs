//! Fundamental types for the chainwire transport core.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: peer addresses, object identifiers, network selection and the
//! service life-cycle contract.

pub mod clock;
pub mod error;
pub mod network;
pub mod object;
pub mod peer;
pub mod service;

pub use clock::{Clock, SystemClock};
pub use error::ServiceError;
pub use network::NetworkId;
pub use object::ObjectId;
pub use peer::PeerAddress;
pub use service::{Lifecycle, Service, ServiceState};
