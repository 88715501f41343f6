//! Core library for the temporal Bragg experiment controller.
//!
//! This library contains the device capability traits, the instrument drivers
//! and the experiment controller that sequences a laser, an RF synthesizer, a
//! wavemeter, a trigger/DC signal generator and a spectrum analyzer through one
//! measurement. It is used by the `bragg` operator binary and by the
//! integration tests.

pub mod adapters;
pub mod config;
pub mod error;
pub mod experiment;
pub mod hardware;

pub use error::{AppResult, BraggError, DeviceRole};
pub use experiment::{ExperimentConfig, ExperimentController, ExperimentPhase};
pub use hardware::SignalGeneratorChoice;
