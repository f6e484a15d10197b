//! Service life-cycle shared by every long-lived component.
//!
//! ```text
//! STOPPED -> STARTING -> RUNNING <-> PAUSED
//!                        RUNNING -> STOPPING -> STOPPED
//! any (except DESTROYED) -> ERROR
//! any -> DESTROYED (terminal)
//! ```
//!
//! `start` is idempotent while starting or running. `stop` keeps
//! configuration so a later `start` resumes from a clean state. A destroyed
//! service can never be started again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ServiceError;

/// The life-cycle state of a service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    Starting,
    Running,
    Paused,
    Stopping,
    #[default]
    Stopped,
    Error,
    Destroyed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Destroyed => "DESTROYED",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything exposing the common life-cycle state.
pub trait Service {
    /// Name used in logs and events.
    fn service_name(&self) -> &str;

    /// Current life-cycle state.
    fn service_state(&self) -> ServiceState;
}

/// Life-cycle state machine. Components embed one and drive it from their
/// own `start`/`stop`/`destroy` methods.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    state: ServiceState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    /// Enter STARTING. Returns `Ok(false)` when already starting or running,
    /// in which case the caller must not start anything.
    pub fn begin_start(&mut self) -> Result<bool, ServiceError> {
        match self.state {
            ServiceState::Starting | ServiceState::Running => Ok(false),
            ServiceState::Stopped | ServiceState::Error => {
                self.state = ServiceState::Starting;
                Ok(true)
            }
            ServiceState::Destroyed => Err(ServiceError::Destroyed),
            from => Err(ServiceError::InvalidTransition {
                from,
                to: ServiceState::Starting,
            }),
        }
    }

    /// STARTING -> RUNNING.
    pub fn mark_running(&mut self) -> Result<(), ServiceError> {
        self.transition(ServiceState::Starting, ServiceState::Running)
    }

    /// RUNNING -> PAUSED.
    pub fn pause(&mut self) -> Result<(), ServiceError> {
        self.transition(ServiceState::Running, ServiceState::Paused)
    }

    /// PAUSED -> RUNNING.
    pub fn resume(&mut self) -> Result<(), ServiceError> {
        self.transition(ServiceState::Paused, ServiceState::Running)
    }

    /// Enter STOPPING. Returns `Ok(false)` when already stopped.
    pub fn begin_stop(&mut self) -> Result<bool, ServiceError> {
        match self.state {
            ServiceState::Stopped => Ok(false),
            ServiceState::Destroyed => Err(ServiceError::Destroyed),
            _ => {
                self.state = ServiceState::Stopping;
                Ok(true)
            }
        }
    }

    /// STOPPING -> STOPPED.
    pub fn mark_stopped(&mut self) -> Result<(), ServiceError> {
        self.transition(ServiceState::Stopping, ServiceState::Stopped)
    }

    /// Move to ERROR. Has no effect on a destroyed service.
    pub fn fail(&mut self) {
        if self.state != ServiceState::Destroyed {
            self.state = ServiceState::Error;
        }
    }

    /// Terminal transition.
    pub fn destroy(&mut self) {
        self.state = ServiceState::Destroyed;
    }

    fn transition(&mut self, from: ServiceState, to: ServiceState) -> Result<(), ServiceError> {
        if self.state == ServiceState::Destroyed {
            return Err(ServiceError::Destroyed);
        }
        if self.state != from {
            return Err(ServiceError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
