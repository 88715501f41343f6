//! Custom error types for the application.
//!
//! This module defines the primary error type, `BraggError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! report failures from parameter validation, device sessions and settings loading.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: an experiment parameter is invalid. Raised before any
//!   device I/O, so no instrument has been touched.
//! - **`OutOfRange`**: a physical value exceeds the limits of the concrete device
//!   it was addressed to (e.g. 2.0 V on a Red Pitaya output).
//! - **`Connection`**: a device session could not be opened.
//! - **`DeviceCommand`**: a connected device rejected or failed a command.
//! - **`InvalidPhase`**: an operation was requested in a controller phase that
//!   does not allow it.
//! - **`Faulted`**: the controller is in its absorbing fault state; only
//!   `shutdown()` is allowed.
//!
//! Driver code works with `anyhow::Result` internally; the controller wraps those
//! failures into `Connection` / `DeviceCommand` together with the device role and
//! the operation name so an operator knows where to look.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, BraggError>;

/// Role of an instrument within the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// Seed laser + EDFA.
    Laser,
    /// Dual-channel RF synthesizer.
    RfGenerator,
    /// Wavemeter HTTP service.
    Wavemeter,
    /// Trigger / DC signal generator.
    SignalGenerator,
    /// Spectrum analyzer.
    SpectrumAnalyzer,
}

impl DeviceRole {
    /// Connection order used by the controller. Teardown runs in reverse.
    pub const CONNECT_ORDER: [DeviceRole; 5] = [
        DeviceRole::Laser,
        DeviceRole::RfGenerator,
        DeviceRole::Wavemeter,
        DeviceRole::SignalGenerator,
        DeviceRole::SpectrumAnalyzer,
    ];

    /// Short human readable name.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceRole::Laser => "laser",
            DeviceRole::RfGenerator => "rf_generator",
            DeviceRole::Wavemeter => "wavemeter",
            DeviceRole::SignalGenerator => "signal_generator",
            DeviceRole::SpectrumAnalyzer => "spectrum_analyzer",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every failure the controller reports to its caller.
#[derive(Error, Debug)]
pub enum BraggError {
    /// An experiment parameter is invalid; raised before any device I/O.
    #[error("Configuration error in '{field}': {reason}")]
    Configuration {
        /// Offending parameter name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A physical value exceeds the addressed device's limits.
    #[error("{device}: {quantity} {value} outside [{min}, {max}]")]
    OutOfRange {
        /// Driver name.
        device: &'static str,
        /// Quantity being set, e.g. "trigger high level".
        quantity: &'static str,
        /// Requested value.
        value: f64,
        /// Lowest accepted value.
        min: f64,
        /// Highest accepted value.
        max: f64,
    },

    /// A device session could not be opened.
    #[error("Failed to connect {device}: {source:#}")]
    Connection {
        /// Role that failed to connect.
        device: DeviceRole,
        /// Driver error.
        #[source]
        source: anyhow::Error,
    },

    /// A connected device failed a command.
    #[error("{device} failed during '{operation}': {source:#}")]
    DeviceCommand {
        /// Role that failed.
        device: DeviceRole,
        /// Controller operation in progress.
        operation: &'static str,
        /// Driver error.
        #[source]
        source: anyhow::Error,
    },

    /// The operation is not allowed in the current phase.
    #[error("Operation '{operation}' not allowed in phase {phase}")]
    InvalidPhase {
        /// Phase name at the time of the call.
        phase: &'static str,
        /// Rejected operation.
        operation: &'static str,
    },

    /// The controller is faulted; only `shutdown()` is accepted.
    #[error("Controller is faulted ({device} during '{operation}'); call shutdown()")]
    Faulted {
        /// Role whose failure faulted the controller.
        device: DeviceRole,
        /// Operation that was running.
        operation: &'static str,
    },

    /// The capture sink refused a record; the run stops without faulting.
    #[error("Capture sink rejected cycle {cycle}: {source:#}")]
    CaptureSink {
        /// Cycle whose record was refused.
        cycle: u32,
        /// Sink error.
        #[source]
        source: anyhow::Error,
    },

    /// A driver was requested whose cargo feature is off.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// The settings providers could not be merged or extracted.
    #[error("Settings load error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Settings loaded but violate a constraint.
    #[error("Settings validation error: {0}")]
    SettingsValidation(String),
}

impl BraggError {
    /// Shorthand for a [`BraggError::Configuration`].
    pub fn configuration(field: &'static str, reason: impl Into<String>) -> Self {
        BraggError::Configuration {
            field,
            reason: reason.into(),
        }
    }

    /// Device this error is attributed to, if any.
    pub fn device(&self) -> Option<DeviceRole> {
        match self {
            BraggError::Connection { device, .. }
            | BraggError::DeviceCommand { device, .. }
            | BraggError::Faulted { device, .. } => Some(*device),
            _ => None,
        }
    }
}
