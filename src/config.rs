//! Configuration System using Figment
//!
//! Settings are loaded from:
//! 1. built-in defaults (the lab's usual addresses and a known-good experiment)
//! 2. a TOML file, usually `config/bragg.toml`
//! 3. environment variables prefixed with `BRAGG_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! BRAGG_APPLICATION__LOG_LEVEL=debug
//! BRAGG_SIGNAL_GENERATOR__CHOICE=tektro_afg
//! BRAGG_SIGNAL_GENERATOR__TEKTRO_AFG__HOST=10.0.2.50
//! BRAGG_EXPERIMENT__EDFA_POWER=1.8
//! ```

use crate::error::{AppResult, BraggError};
use crate::experiment::config::ExperimentConfig;
use crate::experiment::run::RunPlan;
use crate::hardware::signal_generator::SignalGeneratorChoice;
use crate::hardware::windfreak::{check_channel_power, DEFAULT_CHANNEL_POWER_DBM};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Name and logging.
    pub application: ApplicationSettings,
    /// Laser address.
    pub laser: LaserSettings,
    /// RF synthesizer serial link and output levels.
    pub rf_generator: RfGeneratorSettings,
    /// Wavemeter service.
    pub wavemeter: WavemeterSettings,
    /// Selected trigger/DC generator and the address of each variant.
    pub signal_generator: SignalGeneratorSettings,
    /// Spectrum analyzer address.
    pub spectrum_analyzer: SpectrumAnalyzerSettings,
    /// Parameter set applied by the operator script.
    pub experiment: ExperimentConfig,
    /// Capture loop length and DC ramp.
    pub run: RunPlan,
}

/// Application-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Name shown in logs and the dry-run summary.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "Temporal Bragg".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Muquans laser Telnet shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserSettings {
    /// Host name or IP address.
    pub host: String,
    /// Telnet port.
    pub port: u16,
    /// Per-command timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for LaserSettings {
    fn default() -> Self {
        Self {
            host: "10.0.2.107".to_string(),
            port: 23,
            timeout_ms: 5000,
        }
    }
}

/// Windfreak SynthHD serial link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfGeneratorSettings {
    /// Serial device, e.g. `/dev/ttyACM0` or `COM4`.
    pub port: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Per-command timeout in milliseconds.
    pub timeout_ms: u64,
    /// Output power of channels A and B during the sweep (dBm).
    pub channel_power_dbm: [f64; 2],
}

impl Default for RfGeneratorSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 1000,
            channel_power_dbm: DEFAULT_CHANNEL_POWER_DBM,
        }
    }
}

/// Wavemeter HTTP service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavemeterSettings {
    /// Service root, e.g. `http://localhost:5000`.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for WavemeterSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Network address of one signal generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorAddress {
    /// Host name or IP address.
    pub host: String,
    /// SCPI socket port.
    pub port: u16,
    /// Per-command timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Trigger/DC generator: which instrument backs it, and where each one lives.
///
/// Both variants keep their own address so switching `choice` never points one
/// driver at the other instrument's socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalGeneratorSettings {
    /// Instrument backing the signal generator role.
    pub choice: SignalGeneratorChoice,
    /// Red Pitaya SCPI server.
    pub red_pitaya: GeneratorAddress,
    /// Tektronix AFG raw socket.
    pub tektro_afg: GeneratorAddress,
}

impl SignalGeneratorSettings {
    /// Address of the instrument named by `choice`.
    pub fn selected(&self) -> &GeneratorAddress {
        match self.choice {
            SignalGeneratorChoice::RedPitaya => &self.red_pitaya,
            SignalGeneratorChoice::TektroAfg => &self.tektro_afg,
        }
    }
}

impl Default for SignalGeneratorSettings {
    fn default() -> Self {
        Self {
            choice: SignalGeneratorChoice::RedPitaya,
            red_pitaya: GeneratorAddress {
                host: "192.168.1.100".to_string(),
                port: 5000,
                timeout_ms: 5000,
            },
            tektro_afg: GeneratorAddress {
                host: "192.168.1.102".to_string(),
                port: 5025,
                timeout_ms: 5000,
            },
        }
    }
}

/// Rigol DSA800 raw SCPI socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumAnalyzerSettings {
    /// Host name or IP address.
    pub host: String,
    /// SCPI socket port.
    pub port: u16,
    /// Per-command timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SpectrumAnalyzerSettings {
    fn default() -> Self {
        Self {
            host: "192.168.1.101".to_string(),
            port: 5555,
            timeout_ms: 5000,
        }
    }
}

macro_rules! timeout_accessor {
    ($($ty:ty),+) => {
        $(impl $ty {
            /// `timeout_ms` as a [`Duration`].
            pub fn timeout(&self) -> Duration {
                Duration::from_millis(self.timeout_ms)
            }
        })+
    };
}

timeout_accessor!(
    LaserSettings,
    RfGeneratorSettings,
    WavemeterSettings,
    GeneratorAddress,
    SpectrumAnalyzerSettings
);

impl Settings {
    /// Provider chain: defaults, then `path`, then `BRAGG_*` variables.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BRAGG_").split("__"))
    }

    /// Load and validate settings from `path` plus environment overrides.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(path)
            .extract()
            .map_err(|e| BraggError::Settings(Box::new(e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check settings-level constraints.
    ///
    /// The experiment parameter set is validated separately, against whichever
    /// generator is finally selected.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(BraggError::SettingsValidation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let addresses = [
            ("laser.host", self.laser.host.as_str()),
            ("rf_generator.port", self.rf_generator.port.as_str()),
            ("wavemeter.base_url", self.wavemeter.base_url.as_str()),
            (
                "signal_generator.red_pitaya.host",
                self.signal_generator.red_pitaya.host.as_str(),
            ),
            (
                "signal_generator.tektro_afg.host",
                self.signal_generator.tektro_afg.host.as_str(),
            ),
            ("spectrum_analyzer.host", self.spectrum_analyzer.host.as_str()),
        ];
        for (key, value) in addresses {
            if value.trim().is_empty() {
                return Err(BraggError::SettingsValidation(format!(
                    "'{}' cannot be empty",
                    key
                )));
            }
        }

        let timeouts = [
            ("laser.timeout_ms", self.laser.timeout_ms),
            ("rf_generator.timeout_ms", self.rf_generator.timeout_ms),
            ("wavemeter.timeout_ms", self.wavemeter.timeout_ms),
            (
                "signal_generator.red_pitaya.timeout_ms",
                self.signal_generator.red_pitaya.timeout_ms,
            ),
            (
                "signal_generator.tektro_afg.timeout_ms",
                self.signal_generator.tektro_afg.timeout_ms,
            ),
            ("spectrum_analyzer.timeout_ms", self.spectrum_analyzer.timeout_ms),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(BraggError::SettingsValidation(format!(
                    "'{}' must be > 0",
                    key
                )));
            }
        }

        if self.rf_generator.baud_rate == 0 {
            return Err(BraggError::SettingsValidation(
                "'rf_generator.baud_rate' must be > 0".to_string(),
            ));
        }
        check_channel_power(self.rf_generator.channel_power_dbm).map_err(|e| {
            BraggError::SettingsValidation(format!("'rf_generator.channel_power_dbm': {}", e))
        })?;
        Ok(())
    }
}
