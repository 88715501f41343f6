//! Tektronix AFG3000C arbitrary function generator
//!
//! Raw-socket SCPI on the LAN port. Channel 1 carries the trigger pulse train,
//! channel 2 the DC control level. Outputs are limited to -5 V .. +5 V.

use crate::adapters::{LineAdapter, TcpLineAdapter};
use crate::hardware::capabilities::SignalGeneratorDevice;
use crate::hardware::signal_generator::{check_pulse, SignalGeneratorChoice, VoltageRange};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

const DEVICE: &str = "Tektronix AFG3000C";

/// Tektronix AFG3000C on its raw SCPI socket.
///
/// Pulse levels are set as HIGH/LOW pairs on CH1; the DC level goes to CH2 as
/// a DC-shaped waveform with an offset.
pub struct TektronixAfg {
    adapter: Box<dyn LineAdapter>,
    range: VoltageRange,
}

impl TektronixAfg {
    /// AFG at `host:port` (usually 5025).
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self::with_adapter(Box::new(
            TcpLineAdapter::new(host, port).with_timeout(timeout),
        ))
    }

    /// Driver over an existing transport, for tests.
    pub fn with_adapter(adapter: Box<dyn LineAdapter>) -> Self {
        Self {
            adapter,
            range: SignalGeneratorChoice::TektroAfg.voltage_range(),
        }
    }

    async fn send_all(&self, commands: &[String]) -> Result<()> {
        for command in commands {
            self.adapter.write_line(command).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SignalGeneratorDevice for TektronixAfg {
    async fn connect(&self) -> Result<()> {
        self.adapter.connect().await?;
        if let Err(err) = self.adapter.write_line("*RST").await {
            // Do not leave a half-open socket behind a failed connect.
            let _ = self.adapter.disconnect().await;
            return Err(err);
        }
        info!("Connected to AFG3000C ({})", self.adapter.info());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.adapter.is_connected().await {
            return Ok(());
        }
        let off = self
            .send_all(&["OUTPut1:STATe OFF".to_string(), "OUTPut2:STATe OFF".to_string()])
            .await;
        let closed = self.adapter.disconnect().await;
        off?;
        closed
    }

    async fn set_trigger_pulse(&self, high: f64, low: f64, period: f64, duty: f64) -> Result<()> {
        check_pulse(DEVICE, self.range, high, low, period, duty)?;
        self.send_all(&[
            "SOURce1:FUNCtion PULSe".to_string(),
            format!("SOURce1:PULSe:PERiod {}", period),
            format!("SOURce1:PULSe:DCYCle {}", duty),
            format!("SOURce1:VOLTage:HIGH {}", high),
            format!("SOURce1:VOLTage:LOW {}", low),
            "OUTPut1:STATe ON".to_string(),
        ])
        .await?;
        info!(
            "Pulse set: high {} V, low {} V, period {} s, duty {} %",
            high, low, period, duty
        );
        Ok(())
    }

    async fn set_dc_voltage(&self, volts: f64) -> Result<()> {
        self.range.check(DEVICE, "dc voltage", volts)?;
        self.send_all(&[
            "SOURce2:FUNCtion DC".to_string(),
            format!("SOURce2:VOLTage:OFFSet {}", volts),
            "OUTPut2:STATe ON".to_string(),
        ])
        .await?;
        info!("DC output set to {} V", volts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockLineAdapter;
    use crate::error::BraggError;

    #[tokio::test]
    async fn test_connect_resets_and_pulse_commands() {
        let adapter = MockLineAdapter::new();
        let afg = TektronixAfg::with_adapter(Box::new(adapter.clone()));
        afg.connect().await.unwrap();
        afg.set_trigger_pulse(3.3, -1.0, 0.748, 98.0).await.unwrap();
        assert_eq!(
            adapter.sent(),
            vec![
                "*RST",
                "SOURce1:FUNCtion PULSe",
                "SOURce1:PULSe:PERiod 0.748",
                "SOURce1:PULSe:DCYCle 98",
                "SOURce1:VOLTage:HIGH 3.3",
                "SOURce1:VOLTage:LOW -1",
                "OUTPut1:STATe ON",
            ]
        );
    }

    #[tokio::test]
    async fn test_dc_range() {
        let adapter = MockLineAdapter::new();
        let afg = TektronixAfg::with_adapter(Box::new(adapter.clone()));
        afg.connect().await.unwrap();

        afg.set_dc_voltage(-4.5).await.unwrap();
        let err = afg.set_dc_voltage(5.5).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BraggError>(),
            Some(BraggError::OutOfRange { max, .. }) if *max == 5.0
        ));
        assert_eq!(
            adapter.sent(),
            vec!["*RST", "SOURce2:FUNCtion DC", "SOURce2:VOLTage:OFFSet -4.5", "OUTPut2:STATe ON"]
        );
    }

    #[tokio::test]
    async fn test_disconnect_turns_outputs_off() {
        let adapter = MockLineAdapter::new();
        let afg = TektronixAfg::with_adapter(Box::new(adapter.clone()));
        afg.connect().await.unwrap();
        afg.disconnect().await.unwrap();
        assert_eq!(
            adapter.sent(),
            vec!["*RST", "OUTPut1:STATe OFF", "OUTPut2:STATe OFF"]
        );
        assert!(!adapter.is_connected().await);
    }
}
