//! Errors shared across crates.

use thiserror::Error;

use crate::ServiceState;

/// Failure of a service life-cycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("invalid life-cycle transition from {from} to {to}")]
    InvalidTransition { from: ServiceState, to: ServiceState },

    #[error("service has been destroyed")]
    Destroyed,

    #[error("service is not running (state: {0})")]
    NotRunning(ServiceState),
}
