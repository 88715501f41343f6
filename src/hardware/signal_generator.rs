//! Construction-time selection of the trigger/DC signal generator.
//!
//! The experiment can run on either a Red Pitaya or a Tektronix AFG3000C. The
//! choice is made once, when the controller is built, and the controller only
//! ever holds a `Box<dyn SignalGeneratorDevice>` afterwards.

use crate::config::SignalGeneratorSettings;
use crate::error::BraggError;
use crate::hardware::capabilities::SignalGeneratorDevice;
use crate::hardware::red_pitaya::RedPitaya;
use crate::hardware::tektronix_afg::TektronixAfg;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which concrete driver backs the signal generator role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalGeneratorChoice {
    /// Red Pitaya, 0..1.8 V.
    RedPitaya,
    /// Tektronix AFG3000C, -5..5 V.
    TektroAfg,
}

impl SignalGeneratorChoice {
    /// Output voltage range of the concrete instrument.
    pub fn voltage_range(&self) -> VoltageRange {
        match self {
            SignalGeneratorChoice::RedPitaya => VoltageRange::new(0.0, 1.8),
            SignalGeneratorChoice::TektroAfg => VoltageRange::new(-5.0, 5.0),
        }
    }

    /// Instrument name used in logs and errors.
    pub fn device_name(&self) -> &'static str {
        match self {
            SignalGeneratorChoice::RedPitaya => "Red Pitaya",
            SignalGeneratorChoice::TektroAfg => "Tektronix AFG3000C",
        }
    }
}

impl fmt::Display for SignalGeneratorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.device_name())
    }
}

/// Closed voltage interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageRange {
    /// Lowest level, volts.
    pub min: f64,
    /// Highest level, volts.
    pub max: f64,
}

impl VoltageRange {
    /// Interval from `min` to `max`.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True for finite `volts` inside the interval.
    pub fn contains(&self, volts: f64) -> bool {
        volts.is_finite() && volts >= self.min && volts <= self.max
    }

    /// Fail with [`BraggError::OutOfRange`] when `volts` is outside the range.
    pub fn check(
        &self,
        device: &'static str,
        quantity: &'static str,
        volts: f64,
    ) -> Result<(), BraggError> {
        if self.contains(volts) {
            Ok(())
        } else {
            Err(BraggError::OutOfRange {
                device,
                quantity,
                value: volts,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Check a pulse train request against `range` before anything is sent.
pub(crate) fn check_pulse(
    device: &'static str,
    range: VoltageRange,
    high: f64,
    low: f64,
    period: f64,
    duty: f64,
) -> Result<(), BraggError> {
    range.check(device, "trigger high level", high)?;
    range.check(device, "trigger low level", low)?;
    if low > high {
        return Err(BraggError::OutOfRange {
            device,
            quantity: "trigger low level",
            value: low,
            min: range.min,
            max: high,
        });
    }
    if !duty.is_finite() || !(0.0..=100.0).contains(&duty) {
        return Err(BraggError::OutOfRange {
            device,
            quantity: "duty cycle",
            value: duty,
            min: 0.0,
            max: 100.0,
        });
    }
    if !period.is_finite() || period <= 0.0 {
        return Err(BraggError::OutOfRange {
            device,
            quantity: "trigger period",
            value: period,
            min: 0.0,
            max: f64::INFINITY,
        });
    }
    Ok(())
}

/// Build the driver selected by `settings.choice`, at that variant's address.
pub fn build_signal_generator(settings: &SignalGeneratorSettings) -> Box<dyn SignalGeneratorDevice> {
    let address = settings.selected();
    match settings.choice {
        SignalGeneratorChoice::RedPitaya => Box::new(RedPitaya::new(
            &address.host,
            address.port,
            address.timeout(),
        )),
        SignalGeneratorChoice::TektroAfg => Box::new(TektronixAfg::new(
            &address.host,
            address.port,
            address.timeout(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_per_variant() {
        let rp = SignalGeneratorChoice::RedPitaya.voltage_range();
        assert!(rp.contains(1.8));
        assert!(!rp.contains(2.0));
        assert!(!rp.contains(-0.1));

        let afg = SignalGeneratorChoice::TektroAfg.voltage_range();
        assert!(afg.contains(-5.0));
        assert!(afg.contains(2.0));
        assert!(!afg.contains(5.5));
    }

    #[test]
    fn test_nan_is_never_in_range() {
        assert!(!SignalGeneratorChoice::TektroAfg.voltage_range().contains(f64::NAN));
    }

    #[test]
    fn test_check_reports_limits() {
        let err = SignalGeneratorChoice::RedPitaya
            .voltage_range()
            .check("Red Pitaya", "dc voltage", 2.0)
            .unwrap_err();
        match err {
            BraggError::OutOfRange { value, max, .. } => {
                assert_eq!(value, 2.0);
                assert_eq!(max, 1.8);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_pulse_check() {
        let rp = SignalGeneratorChoice::RedPitaya.voltage_range();
        check_pulse("Red Pitaya", rp, 1.8, 0.0, 0.748, 98.0).unwrap();
        assert!(check_pulse("Red Pitaya", rp, 1.8, 0.0, 0.748, 101.0).is_err());
        assert!(check_pulse("Red Pitaya", rp, 1.0, 1.5, 0.748, 50.0).is_err());
        assert!(check_pulse("Red Pitaya", rp, 1.8, 0.0, 0.0, 50.0).is_err());
        assert!(check_pulse("Red Pitaya", rp, 2.5, 0.0, 0.5, 50.0).is_err());
    }

    #[test]
    fn test_choice_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            choice: SignalGeneratorChoice,
        }
        let w: Wrapper = toml::from_str("choice = \"tektro_afg\"").unwrap();
        assert_eq!(w.choice, SignalGeneratorChoice::TektroAfg);
    }
}
