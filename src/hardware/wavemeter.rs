//! HTTP wavemeter client
//!
//! The wavemeter server answers `GET {base_url}/api/freq/{channel}` with
//! `{"frequency": <Hz>}`.

use crate::hardware::capabilities::WavemeterDevice;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct FrequencyReply {
    frequency: f64,
}

/// Wavemeter reached over its HTTP API.
pub struct HttpWavemeter {
    base_url: String,
    timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl HttpWavemeter {
    /// Service rooted at `base_url`. No request is made until `connect`.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<Client> {
        self.client
            .lock()
            .map_err(|_| anyhow!("wavemeter client lock poisoned"))?
            .clone()
            .ok_or_else(|| anyhow!("Wavemeter at {} not connected", self.base_url))
    }
}

#[async_trait]
impl WavemeterDevice for HttpWavemeter {
    async fn connect(&self) -> Result<()> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        *self
            .client
            .lock()
            .map_err(|_| anyhow!("wavemeter client lock poisoned"))? = Some(client);
        info!("Wavemeter client ready for {}", self.base_url);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client
            .lock()
            .map_err(|_| anyhow!("wavemeter client lock poisoned"))?
            .take();
        Ok(())
    }

    async fn get_frequency(&self, channel: u8) -> Result<f64> {
        let url = format!("{}/api/freq/{}", self.base_url, channel);
        let reply: FrequencyReply = self
            .client()?
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", url))?
            .json()
            .await
            .with_context(|| format!("Unexpected reply format from {}", url))?;
        debug!("Wavemeter channel {}: {} Hz", channel, reply.frequency);
        Ok(reply.frequency)
    }
}
