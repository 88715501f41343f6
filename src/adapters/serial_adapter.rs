//! Serial line adapter
//!
//! Async RS-232/USB-CDC transport built on tokio-serial. Only compiled with
//! the `instrument_serial` feature; without it `connect` reports the missing
//! feature instead of failing at build time.

use super::LineAdapter;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use anyhow::{anyhow, bail, Context};
#[cfg(feature = "instrument_serial")]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_serial")]
use tokio_serial::{SerialPortBuilderExt, SerialStream};
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Serial adapter with newline framing.
pub struct SerialLineAdapter {
    /// Port name (e.g., "/dev/ttyACM0", "COM4")
    pub(crate) port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    pub(crate) baud_rate: u32,

    /// Read timeout
    pub(crate) timeout: Duration,

    /// Line terminator for commands
    pub(crate) line_terminator: String,

    #[cfg(feature = "instrument_serial")]
    port: Mutex<Option<BufReader<SerialStream>>>,
}

impl SerialLineAdapter {
    /// Create a new serial adapter with default settings (1 s timeout, "\n" terminator)
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\n".to_string(),
            #[cfg(feature = "instrument_serial")]
            port: Mutex::new(None),
        }
    }

    /// Per-command read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Terminator appended to writes and stripped from replies.
    pub fn with_line_terminator(mut self, terminator: &str) -> Self {
        self.line_terminator = terminator.to_string();
        self
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl LineAdapter for SerialLineAdapter {
    async fn connect(&self) -> Result<()> {
        let stream = tokio_serial::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .with_context(|| {
                format!(
                    "Failed to open serial port '{}' at {} baud",
                    self.port_name, self.baud_rate
                )
            })?;

        *self.port.lock().await = Some(BufReader::new(stream));
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.port.lock().await.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    async fn write_line(&self, command: &str) -> Result<()> {
        let mut guard = self.port.lock().await;
        let port = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Serial port '{}' not open", self.port_name))?;

        let payload = format!("{}{}", command, self.line_terminator);
        port.get_mut()
            .write_all(payload.as_bytes())
            .await
            .context("Failed to write to serial port")?;
        port.get_mut().flush().await.context("Failed to flush serial port")?;
        debug!("Sent serial command: {}", command);
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut guard = self.port.lock().await;
        let port = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Serial port '{}' not open", self.port_name))?;

        let payload = format!("{}{}", command, self.line_terminator);
        port.get_mut()
            .write_all(payload.as_bytes())
            .await
            .context("Failed to write to serial port")?;

        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, port.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("Serial read timeout after {:?}", self.timeout))?
            .context("Serial read error")?;
        if read == 0 {
            bail!("Unexpected EOF from serial port '{}'", self.port_name);
        }

        let response = line.trim().to_string();
        debug!("Received serial response: {}", response);
        Ok(response)
    }

    async fn is_connected(&self) -> bool {
        self.port.lock().await.is_some()
    }

    fn info(&self) -> String {
        format!("SerialLineAdapter({} @ {} baud)", self.port_name, self.baud_rate)
    }
}

#[cfg(not(feature = "instrument_serial"))]
#[async_trait]
impl LineAdapter for SerialLineAdapter {
    async fn connect(&self) -> Result<()> {
        Err(crate::error::BraggError::FeatureNotEnabled("instrument_serial".to_string()).into())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn write_line(&self, _command: &str) -> Result<()> {
        Err(crate::error::BraggError::FeatureNotEnabled("instrument_serial".to_string()).into())
    }

    async fn query(&self, _command: &str) -> Result<String> {
        Err(crate::error::BraggError::FeatureNotEnabled("instrument_serial".to_string()).into())
    }

    async fn is_connected(&self) -> bool {
        false
    }

    fn info(&self) -> String {
        format!("SerialLineAdapter({} @ {} baud)", self.port_name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_adapter_creation() {
        let adapter = SerialLineAdapter::new("/dev/ttyACM0", 115200)
            .with_timeout(Duration::from_millis(250))
            .with_line_terminator("\r");
        assert_eq!(adapter.port_name, "/dev/ttyACM0");
        assert_eq!(adapter.baud_rate, 115200);
        assert_eq!(adapter.timeout, Duration::from_millis(250));
        assert_eq!(adapter.line_terminator, "\r");
    }

    #[test]
    fn test_info_string() {
        let adapter = SerialLineAdapter::new("COM4", 9600);
        assert_eq!(adapter.info(), "SerialLineAdapter(COM4 @ 9600 baud)");
    }

    #[tokio::test]
    async fn test_write_before_connect_fails() {
        let adapter = SerialLineAdapter::new("/dev/null", 9600);
        assert!(!adapter.is_connected().await);
        assert!(adapter.write_line("C0").await.is_err());
    }
}
