//! Muquans seed laser + EDFA driver
//!
//! The laser controller exposes a Telnet shell. Every command is an invocation
//! of `sml780_tool` and the shell answers with one status line:
//!
//! - `sml780_tool Enable_Current_Laser_Diode on|off`
//! - `sml780_tool edfa_set <watts>`
//! - `sml780_tool edfa_shutdown`

use crate::adapters::{LineAdapter, TcpLineAdapter};
use crate::hardware::capabilities::LaserDevice;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Highest EDFA output power the controller accepts, in watts.
pub const MAX_EDFA_POWER_W: f64 = 2.5;

const SEED_ON: &str = "sml780_tool Enable_Current_Laser_Diode on";
const SEED_OFF: &str = "sml780_tool Enable_Current_Laser_Diode off";
const EDFA_SHUTDOWN: &str = "sml780_tool edfa_shutdown";

/// Telnet-controlled Muquans laser.
pub struct MuquansLaser {
    adapter: Box<dyn LineAdapter>,
    /// Pause between EDFA shutdown and seed off.
    settle: Duration,
}

impl MuquansLaser {
    /// Laser shell at `host:port` (Telnet, usually port 23).
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self::with_adapter(Box::new(
            TcpLineAdapter::new(host, port).with_timeout(timeout),
        ))
    }

    /// Driver over an existing transport, with the default 1 s settle time.
    pub fn with_adapter(adapter: Box<dyn LineAdapter>) -> Self {
        Self {
            adapter,
            settle: Duration::from_secs(1),
        }
    }

    /// Override the pause between EDFA shutdown and seed off.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn command(&self, command: &str) -> Result<String> {
        let reply = self.adapter.query(command).await?;
        if reply.to_ascii_lowercase().contains("error") {
            bail!("Laser rejected '{}': {}", command, reply);
        }
        Ok(reply)
    }
}

#[async_trait]
impl LaserDevice for MuquansLaser {
    async fn connect(&self) -> Result<()> {
        self.adapter.connect().await?;
        info!("Connected to Muquans laser ({})", self.adapter.info());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.adapter.disconnect().await
    }

    async fn seed_on(&self) -> Result<()> {
        self.command(SEED_ON).await?;
        info!("Seed laser enabled");
        Ok(())
    }

    async fn seed_off(&self) -> Result<()> {
        self.command(SEED_OFF).await?;
        info!("Seed laser disabled");
        Ok(())
    }

    async fn set_edfa_power(&self, watts: f64) -> Result<()> {
        if !watts.is_finite() || !(0.0..=MAX_EDFA_POWER_W).contains(&watts) {
            bail!(
                "EDFA power {} W outside [0, {}] W",
                watts,
                MAX_EDFA_POWER_W
            );
        }
        self.command(&format!("sml780_tool edfa_set {}", watts)).await?;
        info!("EDFA power set to {} W", watts);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.command(EDFA_SHUTDOWN).await?;
        tokio::time::sleep(self.settle).await;
        self.command(SEED_OFF).await?;
        info!("Laser system shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Fake laser shell: answers "OK" to every line and returns what it saw.
    async fn fake_shell(lines: usize) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut seen = Vec::new();
            for _ in 0..lines {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                seen.push(line.trim_end().to_string());
                reader.get_mut().write_all(b"OK\n").await.unwrap();
            }
            seen
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_wire_commands() {
        let (port, server) = fake_shell(4).await;
        let laser = MuquansLaser::new("127.0.0.1", port, Duration::from_secs(1))
            .with_settle_time(Duration::from_millis(1));
        laser.connect().await.unwrap();
        laser.seed_on().await.unwrap();
        laser.set_edfa_power(1.5).await.unwrap();
        laser.shutdown().await.unwrap();
        laser.disconnect().await.unwrap();

        assert_eq!(
            server.await.unwrap(),
            vec![
                SEED_ON.to_string(),
                "sml780_tool edfa_set 1.5".to_string(),
                EDFA_SHUTDOWN.to_string(),
                SEED_OFF.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_power_limit_checked_before_sending() {
        let laser = MuquansLaser::new("127.0.0.1", 9, Duration::from_millis(10));
        // Not connected: the limit check must fire before any I/O is attempted.
        let err = laser.set_edfa_power(3.0).await.unwrap_err();
        assert!(err.to_string().contains("outside [0, 2.5]"));
    }
}
