//! Rigol DSA800 spectrum analyzer driver
//!
//! Raw-socket SCPI on port 5555. In this experiment the analyzer runs in zero
//! span at a fixed center frequency, triggered externally by the pulse train.
//!
//! Trace readback uses `:TRACe:DATA? TRACE1`, which answers with an IEEE 488.2
//! definite-length block header (`#9000004508`) followed by comma separated
//! amplitudes in dBm.

use crate::adapters::{LineAdapter, TcpLineAdapter};
use crate::hardware::capabilities::{AnalyzerTrigger, SpectrumAnalyzerDevice, TriggerEdge};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Rigol DSA800 series analyzer.
pub struct RigolDsa800 {
    adapter: Box<dyn LineAdapter>,
}

impl RigolDsa800 {
    /// Analyzer at `host:port` (usually 5555).
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self::with_adapter(Box::new(
            TcpLineAdapter::new(host, port).with_timeout(timeout),
        ))
    }

    /// Driver over an existing transport.
    pub fn with_adapter(adapter: Box<dyn LineAdapter>) -> Self {
        Self { adapter }
    }

    async fn write(&self, command: String) -> Result<()> {
        self.adapter.write_line(&command).await
    }
}

/// Parse a trace reply, with or without a definite-length block header.
pub fn parse_trace(reply: &str) -> Result<Vec<f64>> {
    let body = match reply.strip_prefix('#') {
        Some(rest) => {
            let digits = rest
                .chars()
                .next()
                .and_then(|c| c.to_digit(10))
                .ok_or_else(|| anyhow!("Malformed block header in trace reply"))?
                as usize;
            match rest.get(1 + digits..) {
                Some(body) => body,
                None => bail!("Truncated block header in trace reply"),
            }
        }
        None => reply,
    };

    body.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<f64>()
                .with_context(|| format!("Invalid trace value '{}'", value))
        })
        .collect()
}

#[async_trait]
impl SpectrumAnalyzerDevice for RigolDsa800 {
    async fn connect(&self) -> Result<()> {
        self.adapter.connect().await?;
        info!("Connected to Rigol DSA800 ({})", self.adapter.info());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.adapter.disconnect().await
    }

    async fn set_center_frequency(&self, hz: f64) -> Result<()> {
        self.write(format!(":SENSe:FREQuency:CENTer {}", hz)).await?;
        info!("Center frequency set to {} MHz", hz / 1e6);
        Ok(())
    }

    async fn set_rbw_vbw(&self, rbw_hz: f64, vbw_hz: f64) -> Result<()> {
        self.write(format!(":SENSe:BANDwidth:RESolution {}", rbw_hz))
            .await?;
        self.write(format!(":SENSe:BANDwidth:VIDeo {}", vbw_hz)).await?;
        info!("RBW {} kHz, VBW {} kHz", rbw_hz / 1e3, vbw_hz / 1e3);
        Ok(())
    }

    async fn enable_zero_span_mode(&self) -> Result<()> {
        self.write(":SENSe:FREQuency:SPAN 0".to_string()).await?;
        info!("Zero span mode enabled");
        Ok(())
    }

    async fn set_sweep_time(&self, seconds: f64) -> Result<()> {
        self.write(format!(":SWE:TIME {}", seconds)).await?;
        info!("Sweep time set to {} s", seconds);
        Ok(())
    }

    async fn set_trigger(&self, mode: AnalyzerTrigger, edge: TriggerEdge) -> Result<()> {
        self.write(format!(":TRIGger:SEQuence:SOURce {}", mode.scpi()))
            .await?;
        if mode == AnalyzerTrigger::External {
            self.write(format!(":TRIGger:SEQuence:EXTernal:SLOPe {}", edge.scpi()))
                .await?;
        }
        info!("Trigger source {} ({})", mode.scpi(), edge);
        Ok(())
    }

    async fn start_sweep(&self, continuous: bool) -> Result<()> {
        let state = if continuous { "ON" } else { "OFF" };
        self.write(format!(":INITiate:CONTinuous {}", state)).await?;
        if !continuous {
            self.write(":INITiate:IMMediate".to_string()).await?;
        }
        debug!("Sweep started (continuous = {})", continuous);
        Ok(())
    }

    async fn fetch_trace(&self) -> Result<Vec<f64>> {
        let reply = self.adapter.query(":TRACe:DATA? TRACE1").await?;
        let trace = parse_trace(&reply)?;
        debug!("Fetched trace with {} points", trace.len());
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockLineAdapter;

    #[test]
    fn test_parse_block_header() {
        let trace = parse_trace("#9000000023-70.5, -68.25,-71.0").unwrap();
        assert_eq!(trace, vec![-70.5, -68.25, -71.0]);
    }

    #[test]
    fn test_parse_plain_csv() {
        assert_eq!(parse_trace("1.5,2.5,").unwrap(), vec![1.5, 2.5]);
        assert!(parse_trace("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_trace("#x123").is_err());
        assert!(parse_trace("#9123").is_err());
        assert!(parse_trace("-70.0,abc").is_err());
    }

    #[tokio::test]
    async fn test_zero_span_setup_commands() {
        let adapter = MockLineAdapter::new();
        let sa = RigolDsa800::with_adapter(Box::new(adapter.clone()));
        sa.connect().await.unwrap();
        sa.set_center_frequency(5e6).await.unwrap();
        sa.set_rbw_vbw(1e3, 300.0).await.unwrap();
        sa.enable_zero_span_mode().await.unwrap();
        sa.set_sweep_time(0.5).await.unwrap();
        sa.set_trigger(AnalyzerTrigger::External, TriggerEdge::Positive)
            .await
            .unwrap();
        sa.start_sweep(false).await.unwrap();

        assert_eq!(
            adapter.sent(),
            vec![
                ":SENSe:FREQuency:CENTer 5000000",
                ":SENSe:BANDwidth:RESolution 1000",
                ":SENSe:BANDwidth:VIDeo 300",
                ":SENSe:FREQuency:SPAN 0",
                ":SWE:TIME 0.5",
                ":TRIGger:SEQuence:SOURce EXT",
                ":TRIGger:SEQuence:EXTernal:SLOPe POS",
                ":INITiate:CONTinuous OFF",
                ":INITiate:IMMediate",
            ]
        );
    }

    #[tokio::test]
    async fn test_free_run_has_no_slope() {
        let adapter = MockLineAdapter::new();
        let sa = RigolDsa800::with_adapter(Box::new(adapter.clone()));
        sa.connect().await.unwrap();
        sa.set_trigger(AnalyzerTrigger::FreeRun, TriggerEdge::Negative)
            .await
            .unwrap();
        sa.start_sweep(true).await.unwrap();
        assert_eq!(
            adapter.sent(),
            vec![":TRIGger:SEQuence:SOURce IMM", ":INITiate:CONTinuous ON"]
        );
    }

    #[tokio::test]
    async fn test_fetch_trace_over_socket() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader
                .get_mut()
                .write_all(b"#9000000011-60.0,-61.5\n")
                .await
                .unwrap();
            line
        });

        let sa = RigolDsa800::new("127.0.0.1", port, Duration::from_secs(1));
        sa.connect().await.unwrap();
        assert_eq!(sa.fetch_trace().await.unwrap(), vec![-60.0, -61.5]);
        assert_eq!(server.await.unwrap(), ":TRACe:DATA? TRACE1\n");
    }
}
