//! Timing values derived from an [`ExperimentConfig`].
//!
//! Pure functions only. The trigger generator fires once per `trigger_period`,
//! which is the sweep duration stretched by a fixed margin so the RF
//! synthesizer always idles between two sweeps.

use crate::error::{AppResult, BraggError};
use crate::experiment::config::ExperimentConfig;
use std::time::Duration;

/// Trigger period / sweep duration. Not user configurable.
pub const TRIGGER_PERIOD_MARGIN: f64 = 1.1;

/// Relative tolerance used when deciding whether the span is an exact
/// multiple of the step.
const STEP_ROUNDING_TOLERANCE: f64 = 1e-9;

/// First step count that no longer fits in a `u64`.
const STEP_COUNT_LIMIT: f64 = u64::MAX as f64;

/// Number of steps needed to cover `[f_low, f_high]`.
///
/// A partial final step counts as a whole step. `None` when the count is not
/// a finite, non-negative number that fits in a `u64`.
pub fn sweep_steps(f_low: f64, f_high: f64, f_step: f64) -> Option<u64> {
    let steps = (f_high - f_low) / f_step;
    if !steps.is_finite() || steps < 0.0 {
        return None;
    }
    let nearest = steps.round();
    let whole = if (steps - nearest).abs() <= STEP_ROUNDING_TOLERANCE * nearest.max(1.0) {
        nearest
    } else {
        steps.ceil()
    };
    if whole >= STEP_COUNT_LIMIT {
        None
    } else {
        Some(whole as u64)
    }
}

/// Time for one full RF sweep, in seconds.
pub fn sweep_duration(f_low: f64, f_high: f64, f_step: f64, step_time: f64) -> Option<f64> {
    sweep_steps(f_low, f_high, f_step).map(|steps| steps as f64 * step_time)
}

/// Trigger period for a given sweep duration, in seconds.
pub fn trigger_period(sweep_duration: f64) -> f64 {
    TRIGGER_PERIOD_MARGIN * sweep_duration
}

/// Timing derived from one experiment configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedTiming {
    /// Steps per sweep, partial final step included.
    pub sweep_steps: u64,
    /// Seconds.
    pub sweep_duration: f64,
    /// Seconds.
    pub trigger_period: f64,
}

impl DerivedTiming {
    /// Derive the sweep and trigger timing of `config`.
    ///
    /// Fails with a configuration error naming `f_step` when the step count
    /// does not fit in a `u64`, or `step_time` when the trigger period cannot
    /// be represented as a [`Duration`].
    pub fn from_config(config: &ExperimentConfig) -> AppResult<Self> {
        let sweep_steps =
            sweep_steps(config.f_low, config.f_high, config.f_step).ok_or_else(|| {
                BraggError::configuration(
                    "f_step",
                    format!(
                        "{} Hz steps over [{}, {}] Hz give too many sweep steps",
                        config.f_step, config.f_low, config.f_high
                    ),
                )
            })?;
        let sweep_duration = sweep_steps as f64 * config.step_time;
        let timing = Self {
            sweep_steps,
            sweep_duration,
            trigger_period: trigger_period(sweep_duration),
        };
        timing.trigger_period_duration()?;
        Ok(timing)
    }

    /// The trigger period as a [`Duration`].
    pub fn trigger_period_duration(&self) -> AppResult<Duration> {
        Duration::try_from_secs_f64(self.trigger_period).map_err(|_| {
            BraggError::configuration(
                "step_time",
                format!(
                    "trigger period of {} s ({} steps) is too long",
                    self.trigger_period, self.sweep_steps
                ),
            )
        })
    }
}
