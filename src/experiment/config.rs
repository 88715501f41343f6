//! Experiment parameter set and its validation.

use crate::error::{AppResult, BraggError};
use crate::experiment::timing::DerivedTiming;
use crate::hardware::muquans::MAX_EDFA_POWER_W;
use crate::hardware::signal_generator::SignalGeneratorChoice;
use serde::{Deserialize, Serialize};

/// Physical parameters of one temporal Bragg measurement.
///
/// All fields are supplied together and checked in one pass by
/// [`ExperimentConfig::validate`]; the controller never holds a partially
/// applied configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// EDFA output power (W).
    pub edfa_power: f64,
    /// Sweep start frequency, channel A (Hz).
    pub f_low: f64,
    /// Sweep stop frequency, channel A (Hz).
    pub f_high: f64,
    /// Sweep step (Hz).
    pub f_step: f64,
    /// Channel B offset from channel A (Hz).
    pub diff_freq: f64,
    /// Dwell per sweep step (s).
    pub step_time: f64,
    /// Trigger pulse high level (V).
    pub trigger_high: f64,
    /// Trigger pulse low level (V).
    pub trigger_low: f64,
    /// Trigger duty cycle (%).
    pub trigger_duty: f64,
    /// Optional DC control level on the second generator output (V).
    #[serde(default)]
    pub dc_voltage: Option<f64>,
    /// Analyzer center frequency (Hz).
    pub sa_center_freq: f64,
    /// Resolution bandwidth (Hz).
    pub rbw: f64,
    /// Video bandwidth (Hz).
    pub vbw: f64,
    /// Analyzer sweep time in zero span (s).
    pub sa_sweep_time: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            edfa_power: 1.0,
            f_low: 750e6,
            f_high: 3000e6,
            f_step: 2e6,
            diff_freq: 5e6,
            step_time: 4e-3,
            trigger_high: 1.8,
            trigger_low: 0.0,
            trigger_duty: 98.0,
            dc_voltage: Some(1.5),
            sa_center_freq: 5e6,
            rbw: 1e3,
            vbw: 1e3,
            sa_sweep_time: 1.0,
        }
    }
}

fn finite(field: &'static str, value: f64) -> AppResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(BraggError::configuration(field, format!("must be a finite number, got {}", value)))
    }
}

fn positive(field: &'static str, value: f64) -> AppResult<()> {
    if finite(field, value)? > 0.0 {
        Ok(())
    } else {
        Err(BraggError::configuration(field, format!("must be > 0, got {}", value)))
    }
}

fn within_generator(
    field: &'static str,
    volts: f64,
    generator: SignalGeneratorChoice,
) -> AppResult<()> {
    let range = generator.voltage_range();
    if range.contains(finite(field, volts)?) {
        Ok(())
    } else {
        Err(BraggError::configuration(
            field,
            format!(
                "{} V outside {} range [{}, {}] V",
                volts, generator, range.min, range.max
            ),
        ))
    }
}

impl ExperimentConfig {
    /// Check every field against physical and device limits for `generator`.
    ///
    /// Performs no I/O. The first violation is reported with the field name.
    pub fn validate(&self, generator: SignalGeneratorChoice) -> AppResult<()> {
        positive("edfa_power", self.edfa_power)?;
        if self.edfa_power > MAX_EDFA_POWER_W {
            return Err(BraggError::configuration(
                "edfa_power",
                format!("must be <= {} W, got {}", MAX_EDFA_POWER_W, self.edfa_power),
            ));
        }

        finite("f_low", self.f_low)?;
        finite("f_high", self.f_high)?;
        if self.f_low >= self.f_high {
            return Err(BraggError::configuration(
                "f_low",
                format!("must be below f_high ({} >= {})", self.f_low, self.f_high),
            ));
        }
        positive("f_step", self.f_step)?;
        finite("diff_freq", self.diff_freq)?;
        positive("step_time", self.step_time)?;
        DerivedTiming::from_config(self)?;

        let duty = finite("trigger_duty", self.trigger_duty)?;
        if !(0.0..=100.0).contains(&duty) {
            return Err(BraggError::configuration(
                "trigger_duty",
                format!("must be within 0..=100 %, got {}", duty),
            ));
        }
        within_generator("trigger_high", self.trigger_high, generator)?;
        within_generator("trigger_low", self.trigger_low, generator)?;
        if self.trigger_low > self.trigger_high {
            return Err(BraggError::configuration(
                "trigger_low",
                format!(
                    "must not exceed trigger_high ({} > {})",
                    self.trigger_low, self.trigger_high
                ),
            ));
        }
        if let Some(volts) = self.dc_voltage {
            within_generator("dc_voltage", volts, generator)?;
        }

        positive("sa_center_freq", self.sa_center_freq)?;
        positive("rbw", self.rbw)?;
        positive("vbw", self.vbw)?;
        positive("sa_sweep_time", self.sa_sweep_time)?;
        Ok(())
    }
}
