//! Controller phase state machine.

use std::fmt;

/// Lifecycle phase of the [`crate::experiment::ExperimentController`].
///
/// ```text
/// Uninitialized --connect_all--> Connected --set_experiment--> Configured
///                                               ^    |              |
///                                               +----+ (reconfigure) | run_experiment
///                                                                   v
///                                          Configured <--done-- Running
///
/// any --device error--> Faulted        any --shutdown--> ShutDown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentPhase {
    /// No session open yet.
    Uninitialized,
    /// Every device connected, nothing pushed.
    Connected,
    /// A validated parameter set has been pushed to all devices.
    Configured,
    /// The capture loop is active.
    Running,
    /// Absorbing; only `shutdown()` leaves it.
    Faulted,
    /// Terminal.
    ShutDown,
}

impl ExperimentPhase {
    /// Name used in logs and [`crate::error::BraggError::InvalidPhase`].
    pub fn name(&self) -> &'static str {
        match self {
            ExperimentPhase::Uninitialized => "Uninitialized",
            ExperimentPhase::Connected => "Connected",
            ExperimentPhase::Configured => "Configured",
            ExperimentPhase::Running => "Running",
            ExperimentPhase::Faulted => "Faulted",
            ExperimentPhase::ShutDown => "ShutDown",
        }
    }

    /// True once every device session is open and no fault has occurred.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ExperimentPhase::Connected | ExperimentPhase::Configured | ExperimentPhase::Running
        )
    }
}

impl fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-device session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never opened.
    Unconnected,
    /// Open and usable.
    Connected,
    /// Closed by teardown; not reopened.
    Closed,
}
