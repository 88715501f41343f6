//! Experiment orchestration core.
//!
//! - [`config`]: the user-supplied parameter set and its validation
//! - [`timing`]: pure derivation of sweep and trigger timing
//! - [`phase`]: controller and session state
//! - [`run`]: run plan, capture records, sinks, cancellation
//! - [`controller`]: [`ExperimentController`], which owns the devices

pub mod config;
pub mod controller;
pub mod phase;
pub mod run;
pub mod timing;

pub use config::ExperimentConfig;
pub use controller::{DeviceFailure, DeviceSet, ExperimentController, ShutdownReport};
pub use phase::{ExperimentPhase, SessionState};
pub use run::{
    CancelToken, CaptureRecord, CaptureSink, CollectingSink, DcRamp, LoggingSink, RunPlan,
    RunSummary,
};
pub use timing::{DerivedTiming, TRIGGER_PERIOD_MARGIN};
