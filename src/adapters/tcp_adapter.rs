//! TCP line adapter for LAN instruments
//!
//! Used for Telnet-style command shells (Muquans laser) and raw-socket SCPI
//! (Rigol DSA800, Tektronix AFG3000C, Red Pitaya SCPI server).
//!
//! Supports addresses like:
//! - "10.0.2.107:23" (Telnet)
//! - "192.168.1.101:5555" (Rigol raw SCPI)
//! - "192.168.1.100:5000" (Red Pitaya SCPI server)

use super::LineAdapter;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// TCP adapter with newline framing.
pub struct TcpLineAdapter {
    /// "host:port"
    pub(crate) address: String,

    /// Connect and read timeout
    pub(crate) timeout: Duration,

    /// Line terminator for commands (typically "\n" for SCPI)
    pub(crate) line_terminator: String,

    stream: Mutex<Option<BufReader<TcpStream>>>,
}

impl TcpLineAdapter {
    /// Create a new TCP adapter with default settings (5 s timeout, "\n" terminator)
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            stream: Mutex::new(None),
        }
    }

    /// Set connect/read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: &str) -> Self {
        self.line_terminator = terminator.to_string();
        self
    }

    async fn send(stream: &mut BufReader<TcpStream>, payload: &str) -> Result<()> {
        let socket = stream.get_mut();
        socket.write_all(payload.as_bytes()).await?;
        socket.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl LineAdapter for TcpLineAdapter {
    async fn connect(&self) -> Result<()> {
        let socket = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {} after {:?}", self.address, self.timeout))?
            .with_context(|| format!("Failed to connect to {}", self.address))?;
        socket.set_nodelay(true)?;

        *self.stream.lock().await = Some(BufReader::new(socket));
        debug!("TCP session '{}' opened", self.address);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream
                .get_mut()
                .shutdown()
                .await
                .with_context(|| format!("Failed to close {}", self.address))?;
            debug!("TCP session '{}' closed", self.address);
        }
        Ok(())
    }

    async fn write_line(&self, command: &str) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to {}", self.address))?;

        let payload = format!("{}{}", command, self.line_terminator);
        Self::send(stream, &payload)
            .await
            .with_context(|| format!("Write failed for: {}", command))?;
        debug!("[{}] -> {}", self.address, command);
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to {}", self.address))?;

        let payload = format!("{}{}", command, self.line_terminator);
        Self::send(stream, &payload)
            .await
            .with_context(|| format!("Write failed for: {}", command))?;

        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, stream.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("No response to '{}' within {:?}", command, self.timeout))?
            .with_context(|| format!("Read failed for: {}", command))?;
        if read == 0 {
            bail!("{} closed the connection during '{}'", self.address, command);
        }

        let response = line.trim().to_string();
        debug!("[{}] {} -> {}", self.address, command, response);
        Ok(response)
    }

    async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    fn info(&self) -> String {
        format!(
            "TcpLineAdapter({} @ {}ms timeout)",
            self.address,
            self.timeout.as_millis()
        )
    }
}
