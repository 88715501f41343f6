//! Measurement loop types: run plan, captured records, sinks and cancellation.

use crate::error::{AppResult, BraggError};
use crate::hardware::signal_generator::SignalGeneratorChoice;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Linear DC control-voltage ramp across the capture cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DcRamp {
    /// Volts at the first cycle.
    pub start: f64,
    /// Volts at the last cycle.
    pub stop: f64,
}

/// What `run_experiment` does once the devices are configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPlan {
    /// Number of trigger periods to capture.
    pub cycles: u32,
    /// Optional DC ramp on output 2, one step per cycle.
    pub dc_ramp: Option<DcRamp>,
    /// Wavemeter channel the laser is routed to.
    pub wavemeter_channel: u8,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            cycles: 5,
            dc_ramp: None,
            wavemeter_channel: 3,
        }
    }
}

impl RunPlan {
    /// Validate against the selected generator. No I/O.
    pub fn validate(&self, generator: SignalGeneratorChoice) -> AppResult<()> {
        if self.cycles == 0 {
            return Err(BraggError::configuration("cycles", "must be at least 1"));
        }
        if let Some(ramp) = self.dc_ramp {
            let range = generator.voltage_range();
            for (field, volts) in [("dc_ramp.start", ramp.start), ("dc_ramp.stop", ramp.stop)] {
                if !range.contains(volts) {
                    return Err(BraggError::configuration(
                        field,
                        format!(
                            "{} V outside {} range [{}, {}] V",
                            volts, generator, range.min, range.max
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// DC level for `cycle`, if a ramp is configured.
    pub fn dc_voltage_at(&self, cycle: u32) -> Option<f64> {
        let ramp = self.dc_ramp?;
        if self.cycles <= 1 {
            return Some(ramp.start);
        }
        let fraction = f64::from(cycle) / f64::from(self.cycles - 1);
        Some(ramp.start + (ramp.stop - ramp.start) * fraction)
    }
}

/// Everything captured during one trigger period.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    /// Zero-based cycle index.
    pub cycle: u32,
    /// Time since the pulse train was armed.
    pub offset: Duration,
    /// DC level applied for this cycle, if ramping.
    pub dc_voltage: Option<f64>,
    /// Wavemeter reading taken for this cycle.
    pub laser_frequency_hz: f64,
    /// Zero-span trace as read back from the analyzer.
    pub trace: Vec<f64>,
    /// Wall-clock time the trace was read.
    pub timestamp: DateTime<Utc>,
}

/// Receives each capture as soon as it is read back.
///
/// Trace analysis lives behind this trait; the controller only guarantees one
/// call per trigger period, in cycle order.
#[async_trait]
pub trait CaptureSink: Send {
    /// Handle one record. An error stops the run without faulting the devices.
    async fn on_capture(&mut self, record: &CaptureRecord) -> Result<()>;
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// Records in cycle order.
    pub records: Vec<CaptureRecord>,
}

#[async_trait]
impl CaptureSink for CollectingSink {
    async fn on_capture(&mut self, record: &CaptureRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Logs a one-line summary per capture.
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl CaptureSink for LoggingSink {
    async fn on_capture(&mut self, record: &CaptureRecord) -> Result<()> {
        let peak = record
            .trace
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        info!(
            cycle = record.cycle,
            offset_ms = record.offset.as_millis() as u64,
            dc_voltage = ?record.dc_voltage,
            laser_frequency_hz = record.laser_frequency_hz,
            samples = record.trace.len(),
            peak,
            "capture"
        );
        Ok(())
    }
}

/// Outcome of a completed or cancelled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles whose capture reached the sink.
    pub cycles_completed: u32,
    /// True when the token stopped the run early.
    pub cancelled: bool,
}

/// Cooperative cancellation flag checked between capture cycles.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is not yet cancelled.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
