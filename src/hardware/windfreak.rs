//! Windfreak SynthHD dual-channel RF synthesizer driver
//!
//! Serial command set (one letter per register, value in device units):
//!
//! | Cmd | Register              | Unit |
//! |-----|-----------------------|------|
//! | `C` | channel select (0/1)  |      |
//! | `l` | sweep lower frequency | MHz  |
//! | `u` | sweep upper frequency | MHz  |
//! | `s` | sweep step            | MHz  |
//! | `^` | sweep method (1=diff) |      |
//! | `k` | differential offset   | MHz  |
//! | `t` | step time             | ms   |
//! | `w` | trigger function      |      |
//! | `g` | sweep run (0/1)       |      |
//! | `W` | output power          | dBm  |
//! | `[` | sweep power low       | dBm  |
//! | `]` | sweep power high      | dBm  |
//! | `h` | RF output enable      |      |
//! | `E` | PLL enable            |      |
//!
//! Channel B follows channel A in differential mode, so only channel A's sweep
//! registers are written. Teardown mutes and disables both channels, so every
//! sweep configuration powers them up again and restarts the sweep last.

use crate::adapters::{LineAdapter, SerialLineAdapter};
use crate::error::BraggError;
use crate::hardware::capabilities::{DifferentialSweep, RfGeneratorDevice};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Shortest step dwell the SynthHD accepts, in seconds.
pub const MIN_STEP_TIME_S: f64 = 4e-3;
/// Longest step dwell the SynthHD accepts, in seconds.
pub const MAX_STEP_TIME_S: f64 = 10.0;

/// Output power written during safe-state teardown, also the lowest level accepted (dBm).
pub const MIN_POWER_DBM: f64 = -80.0;
/// Highest output power accepted (dBm).
pub const MAX_POWER_DBM: f64 = 20.0;
/// Channel A and B levels used on the bench (dBm).
pub const DEFAULT_CHANNEL_POWER_DBM: [f64; 2] = [10.0, 8.0];

const DIFFERENTIAL_METHOD: u8 = 1;

/// Windfreak SynthHD on a USB serial port.
pub struct WindfreakSynthHd {
    adapter: Box<dyn LineAdapter>,
    channel_power_dbm: [f64; 2],
}

fn mhz(hz: f64) -> f64 {
    hz / 1e6
}

/// Power levels outside the synthesizer's output range.
pub fn check_channel_power(channel_power_dbm: [f64; 2]) -> Result<(), BraggError> {
    for dbm in channel_power_dbm {
        if !dbm.is_finite() || !(MIN_POWER_DBM..=MAX_POWER_DBM).contains(&dbm) {
            return Err(BraggError::OutOfRange {
                device: "Windfreak SynthHD",
                quantity: "channel power",
                value: dbm,
                min: MIN_POWER_DBM,
                max: MAX_POWER_DBM,
            });
        }
    }
    Ok(())
}

impl WindfreakSynthHd {
    /// Synthesizer on serial `port`, not opened yet.
    pub fn new(port: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self::with_adapter(Box::new(
            SerialLineAdapter::new(port, baud_rate).with_timeout(timeout),
        ))
    }

    /// Synthesizer over an arbitrary line transport.
    pub fn with_adapter(adapter: Box<dyn LineAdapter>) -> Self {
        Self {
            adapter,
            channel_power_dbm: DEFAULT_CHANNEL_POWER_DBM,
        }
    }

    /// Output power for channels A and B, applied on every sweep configuration.
    pub fn with_channel_power(mut self, channel_power_dbm: [f64; 2]) -> Self {
        self.channel_power_dbm = channel_power_dbm;
        self
    }

    async fn send_all(&self, commands: &[String]) -> Result<()> {
        for command in commands {
            self.adapter.write_line(command).await?;
        }
        Ok(())
    }

    /// Stop the sweep, drop both channels to minimum power and disable them.
    async fn safe_state(&self) -> Result<()> {
        let mut commands = vec!["g0".to_string()];
        for channel in 0..2 {
            commands.push(format!("C{}", channel));
            commands.push(format!("W{}", MIN_POWER_DBM));
            commands.push("h0".to_string());
            commands.push("E0".to_string());
        }
        self.send_all(&commands).await?;
        debug!("SynthHD outputs disabled");
        Ok(())
    }
}

#[async_trait]
impl RfGeneratorDevice for WindfreakSynthHd {
    async fn connect(&self) -> Result<()> {
        self.adapter.connect().await?;
        info!("Connected to Windfreak SynthHD ({})", self.adapter.info());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.adapter.is_connected().await {
            return Ok(());
        }
        let safe = self.safe_state().await;
        let closed = self.adapter.disconnect().await;
        safe?;
        closed
    }

    fn check_sweep(&self, sweep: &DifferentialSweep) -> Result<(), BraggError> {
        if !sweep.step_time.is_finite()
            || !(MIN_STEP_TIME_S..=MAX_STEP_TIME_S).contains(&sweep.step_time)
        {
            return Err(BraggError::OutOfRange {
                device: "Windfreak SynthHD",
                quantity: "step time",
                value: sweep.step_time,
                min: MIN_STEP_TIME_S,
                max: MAX_STEP_TIME_S,
            });
        }
        check_channel_power(self.channel_power_dbm)
    }

    async fn configure_differential_sweep(&self, sweep: &DifferentialSweep) -> Result<()> {
        self.check_sweep(sweep)?;

        let mut commands = Vec::with_capacity(21);
        for (channel, dbm) in self.channel_power_dbm.iter().enumerate() {
            commands.push(format!("C{}", channel));
            commands.push(format!("W{}", dbm));
            commands.push(format!("[{}", dbm));
            commands.push(format!("]{}", dbm));
            commands.push("E1".to_string());
            commands.push("h1".to_string());
        }
        commands.extend([
            "C0".to_string(),
            format!("l{}", mhz(sweep.f_low)),
            format!("u{}", mhz(sweep.f_high)),
            format!("s{}", mhz(sweep.f_step)),
            format!("^{}", DIFFERENTIAL_METHOD),
            format!("k{}", mhz(sweep.diff_freq)),
            format!("t{}", sweep.step_time * 1e3),
            format!("w{}", sweep.trigger_mode.code()),
            "g1".to_string(),
        ]);
        self.send_all(&commands).await?;
        info!(
            "Differential sweep: A [{} - {}] MHz, step {} MHz, B offset {} MHz, {} ms/step, {:?} dBm",
            mhz(sweep.f_low),
            mhz(sweep.f_high),
            mhz(sweep.f_step),
            mhz(sweep.diff_freq),
            sweep.step_time * 1e3,
            self.channel_power_dbm
        );
        Ok(())
    }
}
