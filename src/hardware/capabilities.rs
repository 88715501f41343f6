//! Capability traits for the five instrument roles.
//!
//! The controller only ever talks to instruments through these traits. Each
//! driver owns its own session state (socket, serial port, HTTP client) behind
//! interior mutability, so every method takes `&self` like the rest of the
//! hardware layer. Drivers report failures with `anyhow`; the controller adds
//! the device role and operation when it wraps them.
//!
//! All physical quantities are SI: hertz, seconds, volts, watts. Drivers that
//! speak other units on the wire (the Windfreak synthesizer uses MHz and ms)
//! convert internally.

use crate::error::BraggError;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Seed laser with erbium-doped fiber amplifier.
#[async_trait]
pub trait LaserDevice: Send + Sync {
    /// Open the control session.
    async fn connect(&self) -> Result<()>;
    /// Close the control session.
    async fn disconnect(&self) -> Result<()>;
    /// Switch the seed laser on.
    async fn seed_on(&self) -> Result<()>;
    /// Switch the seed laser off.
    async fn seed_off(&self) -> Result<()>;
    /// Set the EDFA output power in watts.
    async fn set_edfa_power(&self, watts: f64) -> Result<()>;
    /// Turn the EDFA off, then the seed.
    async fn shutdown(&self) -> Result<()>;
}

/// Trigger behaviour of the RF synthesizer sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfTriggerMode {
    /// Sweep free-runs.
    NoTrigger,
    /// An external trigger edge starts one full sweep.
    FullSweep,
    /// Each trigger edge advances the sweep by one step.
    StepSweep,
}

impl RfTriggerMode {
    /// Code used by the synthesizer's trigger-function register.
    pub fn code(&self) -> u8 {
        match self {
            RfTriggerMode::NoTrigger => 0,
            RfTriggerMode::FullSweep => 1,
            RfTriggerMode::StepSweep => 2,
        }
    }
}

/// Parameters of a differential sweep: channel B follows channel A at a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialSweep {
    /// Channel A start frequency, Hz.
    pub f_low: f64,
    /// Channel A stop frequency, Hz.
    pub f_high: f64,
    /// Frequency increment per step, Hz.
    pub f_step: f64,
    /// Offset of channel B above channel A, Hz.
    pub diff_freq: f64,
    /// Dwell per step, seconds.
    pub step_time: f64,
    /// What starts or advances the sweep.
    pub trigger_mode: RfTriggerMode,
}

/// Dual-channel RF synthesizer.
#[async_trait]
pub trait RfGeneratorDevice: Send + Sync {
    /// Open the serial session.
    async fn connect(&self) -> Result<()>;
    /// Mute both outputs and close the session.
    async fn disconnect(&self) -> Result<()>;

    /// Check `sweep` against the instrument's limits without any I/O.
    ///
    /// The controller calls this before pushing configuration to any device.
    fn check_sweep(&self, _sweep: &DifferentialSweep) -> Result<(), BraggError> {
        Ok(())
    }

    /// Program the sweep, power up both outputs and start the sweep engine.
    async fn configure_differential_sweep(&self, sweep: &DifferentialSweep) -> Result<()>;
}

/// Wavemeter reporting laser frequency per channel.
#[async_trait]
pub trait WavemeterDevice: Send + Sync {
    /// Check the service is reachable.
    async fn connect(&self) -> Result<()>;
    /// Drop the client.
    async fn disconnect(&self) -> Result<()>;
    /// Measured frequency on `channel`, in hertz.
    async fn get_frequency(&self, channel: u8) -> Result<f64>;
}

/// Trigger/DC signal generator.
///
/// Both concrete variants implement exactly these four operations with the same
/// semantics. Levels outside the concrete device's physical range must fail with
/// [`crate::error::BraggError::OutOfRange`] (wrapped in `anyhow`) before anything
/// is written to the instrument.
#[async_trait]
pub trait SignalGeneratorDevice: Send + Sync {
    /// Open the SCPI session.
    async fn connect(&self) -> Result<()>;
    /// Disable both outputs and close the session.
    async fn disconnect(&self) -> Result<()>;
    /// Program the pulse train on output 1. Replaces any previous pulse settings.
    async fn set_trigger_pulse(
        &self,
        high_level: f64,
        low_level: f64,
        period: f64,
        duty_cycle: f64,
    ) -> Result<()>;
    /// Drive output 2 with a DC level.
    async fn set_dc_voltage(&self, voltage: f64) -> Result<()>;
}

/// Spectrum analyzer trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerTrigger {
    /// Sweep immediately.
    FreeRun,
    /// External trigger input.
    External,
    /// Video level crossing.
    Video,
}

impl AnalyzerTrigger {
    /// SCPI mnemonic.
    pub fn scpi(&self) -> &'static str {
        match self {
            AnalyzerTrigger::FreeRun => "IMM",
            AnalyzerTrigger::External => "EXT",
            AnalyzerTrigger::Video => "VID",
        }
    }
}

/// Trigger slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEdge {
    /// Rising edge.
    Positive,
    /// Falling edge.
    Negative,
}

impl TriggerEdge {
    /// SCPI mnemonic.
    pub fn scpi(&self) -> &'static str {
        match self {
            TriggerEdge::Positive => "POS",
            TriggerEdge::Negative => "NEG",
        }
    }
}

impl fmt::Display for TriggerEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scpi())
    }
}

/// Swept-tuned spectrum analyzer used in zero-span mode.
#[async_trait]
pub trait SpectrumAnalyzerDevice: Send + Sync {
    /// Open the SCPI session.
    async fn connect(&self) -> Result<()>;
    /// Close the session.
    async fn disconnect(&self) -> Result<()>;
    /// Center frequency in hertz.
    async fn set_center_frequency(&self, hz: f64) -> Result<()>;
    /// Resolution and video bandwidths in hertz.
    async fn set_rbw_vbw(&self, rbw_hz: f64, vbw_hz: f64) -> Result<()>;
    /// Span 0 Hz: the trace becomes power versus time.
    async fn enable_zero_span_mode(&self) -> Result<()>;
    /// Sweep time in seconds.
    async fn set_sweep_time(&self, seconds: f64) -> Result<()>;
    /// Trigger source and slope.
    async fn set_trigger(&self, mode: AnalyzerTrigger, edge: TriggerEdge) -> Result<()>;
    /// Start a continuous sweep, or a single one when `continuous` is false.
    async fn start_sweep(&self, continuous: bool) -> Result<()>;
    /// Read trace 1 back as amplitudes.
    async fn fetch_trace(&self) -> Result<Vec<f64>>;
}
