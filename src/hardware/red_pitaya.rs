//! Red Pitaya STEMlab as a two-channel signal generator
//!
//! Talks to the board's SCPI server (port 5000). Output 1 carries the trigger
//! pulse train, output 2 the DC control level. Both outputs are limited to
//! 0 V .. 1.8 V in this setup.

use crate::adapters::{LineAdapter, TcpLineAdapter};
use crate::hardware::capabilities::SignalGeneratorDevice;
use crate::hardware::signal_generator::{check_pulse, SignalGeneratorChoice, VoltageRange};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

const DEVICE: &str = "Red Pitaya";

/// Red Pitaya reached over its SCPI server.
pub struct RedPitaya {
    adapter: Box<dyn LineAdapter>,
    range: VoltageRange,
}

impl RedPitaya {
    /// SCPI server at `host:port`; lines end in CRLF.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self::with_adapter(Box::new(
            TcpLineAdapter::new(host, port)
                .with_timeout(timeout)
                .with_line_terminator("\r\n"),
        ))
    }

    /// Driver over an existing transport.
    pub fn with_adapter(adapter: Box<dyn LineAdapter>) -> Self {
        Self {
            adapter,
            range: SignalGeneratorChoice::RedPitaya.voltage_range(),
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
impl SignalGeneratorDevice for RedPitaya {
    async fn connect(&self) -> Result<()> {
        self.adapter.connect().await?;
        info!("Connected to Red Pitaya ({})", self.adapter.info());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.adapter.is_connected().await {
            return Ok(());
        }
        let off = self
            .send_all(&["OUTPUT1:STATE OFF".to_string(), "OUTPUT2:STATE OFF".to_string()])
            .await;
        let closed = self.adapter.disconnect().await;
        off?;
        closed
    }

    async fn set_trigger_pulse(&self, high: f64, low: f64, period: f64, duty: f64) -> Result<()> {
        check_pulse(DEVICE, self.range, high, low, period, duty)?;

        // The generator takes a symmetric amplitude around an offset.
        let amplitude = (high - low) / 2.0;
        let offset = (high + low) / 2.0;
        self.send_all(&[
            "SOUR1:FUNC PWM".to_string(),
            format!("SOUR1:FREQ:FIX {}", 1.0 / period),
            format!("SOUR1:VOLT {}", amplitude),
            format!("SOUR1:VOLT:OFFS {}", offset),
            format!("SOUR1:DCYC {}", duty / 100.0),
            "OUTPUT1:STATE ON".to_string(),
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
            "SOUR2:FUNC DC".to_string(),
            format!("SOUR2:VOLT:OFFS {}", volts),
            "OUTPUT2:STATE ON".to_string(),
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

    async fn connected() -> (RedPitaya, MockLineAdapter) {
        let adapter = MockLineAdapter::new();
        let rp = RedPitaya::with_adapter(Box::new(adapter.clone()));
        rp.connect().await.unwrap();
        (rp, adapter)
    }

    #[tokio::test]
    async fn test_pulse_commands() {
        let (rp, adapter) = connected().await;
        rp.set_trigger_pulse(1.8, 0.0, 0.5, 50.0).await.unwrap();
        assert_eq!(
            adapter.sent(),
            vec![
                "SOUR1:FUNC PWM",
                "SOUR1:FREQ:FIX 2",
                "SOUR1:VOLT 0.9",
                "SOUR1:VOLT:OFFS 0.9",
                "SOUR1:DCYC 0.5",
                "OUTPUT1:STATE ON",
            ]
        );
    }

    #[tokio::test]
    async fn test_dc_out_of_range_sends_nothing() {
        let (rp, adapter) = connected().await;
        let err = rp.set_dc_voltage(2.0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BraggError>(),
            Some(BraggError::OutOfRange { device: "Red Pitaya", .. })
        ));
        assert!(adapter.sent().is_empty());

        rp.set_dc_voltage(1.2).await.unwrap();
        assert_eq!(
            adapter.sent(),
            vec!["SOUR2:FUNC DC", "SOUR2:VOLT:OFFS 1.2", "OUTPUT2:STATE ON"]
        );
    }

    #[tokio::test]
    async fn test_bad_duty_rejected() {
        let (rp, adapter) = connected().await;
        assert!(rp.set_trigger_pulse(1.8, 0.0, 0.5, 120.0).await.is_err());
        assert!(adapter.sent().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_turns_outputs_off() {
        let (rp, adapter) = connected().await;
        rp.disconnect().await.unwrap();
        assert_eq!(adapter.sent(), vec!["OUTPUT1:STATE OFF", "OUTPUT2:STATE OFF"]);
        rp.disconnect().await.unwrap();
        assert_eq!(adapter.sent().len(), 2);
    }
}
