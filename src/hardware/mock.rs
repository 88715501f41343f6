//! Mock Hardware Implementations
//!
//! Simulated instruments for testing the controller without a lab. Every mock
//! appends to a shared [`CallLog`] so tests can assert on the exact order of
//! device operations across all five roles.
//!
//! # Available Mocks
//!
//! - `MockLaser` - seed/EDFA state tracking
//! - `MockRfGenerator` - remembers the last differential sweep
//! - `MockWavemeter` - returns a configurable frequency
//! - `MockSignalGenerator` - enforces the voltage range of the chosen generator
//! - `MockSpectrumAnalyzer` - returns a configurable trace
//!
//! All mocks are cheap to clone and clones share state, so a test can keep a
//! handle after boxing a clone into the controller. Faults are injected per
//! operation name with `fail_on`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

use crate::error::DeviceRole;
use crate::experiment::controller::DeviceSet;
use crate::hardware::capabilities::{
    AnalyzerTrigger, DifferentialSweep, LaserDevice, RfGeneratorDevice, SignalGeneratorDevice,
    SpectrumAnalyzerDevice, TriggerEdge, WavemeterDevice,
};
use crate::hardware::signal_generator::{check_pulse, SignalGeneratorChoice, VoltageRange};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// CallLog - shared record of device operations
// =============================================================================

/// One recorded device operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCall {
    /// Role the call was made on.
    pub device: DeviceRole,
    /// Capability method name, e.g. "set_edfa_power".
    pub operation: &'static str,
    /// Arguments rendered as text, empty when the operation takes none.
    pub detail: String,
    /// Tokio clock reading, so paused-clock tests can check timing.
    pub at: Instant,
}

/// Ordered log shared by every mock in a rig.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<DeviceCall>>>,
}

impl CallLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, device: DeviceRole, operation: &'static str, detail: String) {
        lock(&self.calls).push(DeviceCall {
            device,
            operation,
            detail,
            at: Instant::now(),
        });
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.calls).clone()
    }

    /// `(device, operation)` pairs in call order.
    pub fn operations(&self) -> Vec<(DeviceRole, &'static str)> {
        lock(&self.calls)
            .iter()
            .map(|call| (call.device, call.operation))
            .collect()
    }

    /// Operations issued to one device, in order.
    pub fn for_device(&self, device: DeviceRole) -> Vec<&'static str> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.device == device)
            .map(|call| call.operation)
            .collect()
    }

    /// Number of recorded calls.
    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every recorded call.
    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

/// State every mock shares: role, log, session flag and injected faults.
#[derive(Debug, Clone)]
struct MockCore {
    role: DeviceRole,
    log: CallLog,
    connected: Arc<AtomicBool>,
    faults: Arc<Mutex<HashSet<&'static str>>>,
}

impl MockCore {
    fn new(role: DeviceRole, log: CallLog) -> Self {
        Self {
            role,
            log,
            connected: Arc::new(AtomicBool::new(false)),
            faults: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn fail_on(&self, operation: &'static str) {
        lock(&self.faults).insert(operation);
    }

    fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Record the call, then apply session checks and injected faults.
    fn call(&self, operation: &'static str, detail: String) -> Result<()> {
        self.log.record(self.role, operation, detail);
        if lock(&self.faults).contains(operation) {
            bail!("injected fault in {} {}", self.role, operation);
        }
        match operation {
            "connect" => self.connected.store(true, Ordering::SeqCst),
            "disconnect" => self.connected.store(false, Ordering::SeqCst),
            _ if !self.connected.load(Ordering::SeqCst) => {
                bail!("{} not connected", self.role)
            }
            _ => {}
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

macro_rules! mock_common {
    ($ty:ty) => {
        impl $ty {
            /// Make every later call to `operation` fail.
            pub fn fail_on(&self, operation: &'static str) {
                self.core.fail_on(operation);
            }

            /// Builder form of [`Self::fail_on`].
            pub fn failing_on(self, operation: &'static str) -> Self {
                self.core.fail_on(operation);
                self
            }

            /// Remove every injected fault.
            pub fn clear_faults(&self) {
                self.core.clear_faults();
            }

            /// Whether `connect` succeeded and `disconnect` has not run since.
            pub fn is_connected(&self) -> bool {
                self.core.is_connected()
            }
        }
    };
}

// =============================================================================
// MockLaser
// =============================================================================

/// Laser that tracks seed state and EDFA power.
#[derive(Debug, Clone)]
pub struct MockLaser {
    core: MockCore,
    seed_on: Arc<AtomicBool>,
    edfa_power: Arc<Mutex<f64>>,
}

impl MockLaser {
    /// Seed off, EDFA at 0 W.
    pub fn new(log: CallLog) -> Self {
        Self {
            core: MockCore::new(DeviceRole::Laser, log),
            seed_on: Arc::new(AtomicBool::new(false)),
            edfa_power: Arc::new(Mutex::new(0.0)),
        }
    }

    /// Whether the seed is currently on.
    pub fn seed_is_on(&self) -> bool {
        self.seed_on.load(Ordering::SeqCst)
    }

    /// Last EDFA power set, in watts.
    pub fn edfa_power(&self) -> f64 {
        *lock(&self.edfa_power)
    }
}

mock_common!(MockLaser);

#[async_trait]
impl LaserDevice for MockLaser {
    async fn connect(&self) -> Result<()> {
        self.core.call("connect", String::new())
    }

    async fn disconnect(&self) -> Result<()> {
        self.core.call("disconnect", String::new())
    }

    async fn seed_on(&self) -> Result<()> {
        self.core.call("seed_on", String::new())?;
        self.seed_on.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn seed_off(&self) -> Result<()> {
        self.core.call("seed_off", String::new())?;
        self.seed_on.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn set_edfa_power(&self, watts: f64) -> Result<()> {
        self.core.call("set_edfa_power", watts.to_string())?;
        *lock(&self.edfa_power) = watts;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.core.call("shutdown", String::new())?;
        *lock(&self.edfa_power) = 0.0;
        self.seed_on.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// MockRfGenerator
// =============================================================================

/// Synthesizer that remembers the last sweep.
#[derive(Debug, Clone)]
pub struct MockRfGenerator {
    core: MockCore,
    sweep: Arc<Mutex<Option<DifferentialSweep>>>,
}

impl MockRfGenerator {
    /// No sweep programmed.
    pub fn new(log: CallLog) -> Self {
        Self {
            core: MockCore::new(DeviceRole::RfGenerator, log),
            sweep: Arc::new(Mutex::new(None)),
        }
    }

    /// Last sweep accepted by the synthesizer.
    pub fn sweep(&self) -> Option<DifferentialSweep> {
        *lock(&self.sweep)
    }
}

mock_common!(MockRfGenerator);

#[async_trait]
impl RfGeneratorDevice for MockRfGenerator {
    async fn connect(&self) -> Result<()> {
        self.core.call("connect", String::new())
    }

    async fn disconnect(&self) -> Result<()> {
        self.core.call("disconnect", String::new())
    }

    async fn configure_differential_sweep(&self, sweep: &DifferentialSweep) -> Result<()> {
        self.core
            .call("configure_differential_sweep", format!("{:?}", sweep))?;
        *lock(&self.sweep) = Some(*sweep);
        Ok(())
    }
}

// =============================================================================
// MockWavemeter
// =============================================================================

/// Wavemeter returning a settable frequency on every channel.
#[derive(Debug, Clone)]
pub struct MockWavemeter {
    core: MockCore,
    frequency: Arc<Mutex<f64>>,
}

impl MockWavemeter {
    /// Reports 384.23 THz (Rb D2) until told otherwise.
    pub fn new(log: CallLog) -> Self {
        Self {
            core: MockCore::new(DeviceRole::Wavemeter, log),
            frequency: Arc::new(Mutex::new(384.230e12)),
        }
    }

    /// Frequency returned by subsequent reads.
    pub fn set_frequency(&self, hz: f64) {
        *lock(&self.frequency) = hz;
    }
}

mock_common!(MockWavemeter);

#[async_trait]
impl WavemeterDevice for MockWavemeter {
    async fn connect(&self) -> Result<()> {
        self.core.call("connect", String::new())
    }

    async fn disconnect(&self) -> Result<()> {
        self.core.call("disconnect", String::new())
    }

    async fn get_frequency(&self, channel: u8) -> Result<f64> {
        self.core.call("get_frequency", channel.to_string())?;
        Ok(*lock(&self.frequency))
    }
}

// =============================================================================
// MockSignalGenerator
// =============================================================================

/// Pulse train as last accepted by the generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseSettings {
    /// High level, volts.
    pub high: f64,
    /// Low level, volts.
    pub low: f64,
    /// Period, seconds.
    pub period: f64,
    /// Duty cycle, percent.
    pub duty: f64,
}

/// Signal generator that enforces the limits of the chosen instrument.
#[derive(Debug, Clone)]
pub struct MockSignalGenerator {
    core: MockCore,
    device: &'static str,
    range: VoltageRange,
    pulse: Arc<Mutex<Option<PulseSettings>>>,
    dc_voltage: Arc<Mutex<Option<f64>>>,
}

impl MockSignalGenerator {
    /// Generator with the voltage range of `choice`.
    pub fn new(choice: SignalGeneratorChoice, log: CallLog) -> Self {
        Self {
            core: MockCore::new(DeviceRole::SignalGenerator, log),
            device: choice.device_name(),
            range: choice.voltage_range(),
            pulse: Arc::new(Mutex::new(None)),
            dc_voltage: Arc::new(Mutex::new(None)),
        }
    }

    /// Pulse train currently programmed on output 1.
    pub fn pulse(&self) -> Option<PulseSettings> {
        *lock(&self.pulse)
    }

    /// DC level currently driven on output 2.
    pub fn dc_voltage(&self) -> Option<f64> {
        *lock(&self.dc_voltage)
    }
}

mock_common!(MockSignalGenerator);

#[async_trait]
impl SignalGeneratorDevice for MockSignalGenerator {
    async fn connect(&self) -> Result<()> {
        self.core.call("connect", String::new())
    }

    async fn disconnect(&self) -> Result<()> {
        self.core.call("disconnect", String::new())?;
        *lock(&self.pulse) = None;
        *lock(&self.dc_voltage) = None;
        Ok(())
    }

    async fn set_trigger_pulse(
        &self,
        high_level: f64,
        low_level: f64,
        period: f64,
        duty_cycle: f64,
    ) -> Result<()> {
        check_pulse(self.device, self.range, high_level, low_level, period, duty_cycle)?;
        self.core.call(
            "set_trigger_pulse",
            format!("{} {} {} {}", high_level, low_level, period, duty_cycle),
        )?;
        *lock(&self.pulse) = Some(PulseSettings {
            high: high_level,
            low: low_level,
            period,
            duty: duty_cycle,
        });
        Ok(())
    }

    async fn set_dc_voltage(&self, voltage: f64) -> Result<()> {
        self.range.check(self.device, "dc voltage", voltage)?;
        self.core.call("set_dc_voltage", voltage.to_string())?;
        *lock(&self.dc_voltage) = Some(voltage);
        Ok(())
    }
}

// =============================================================================
// MockSpectrumAnalyzer
// =============================================================================

/// Analyzer settings as last programmed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnalyzerSettings {
    /// Hz.
    pub center_frequency: Option<f64>,
    /// Resolution bandwidth, Hz.
    pub rbw: Option<f64>,
    /// Video bandwidth, Hz.
    pub vbw: Option<f64>,
    /// Zero-span mode enabled.
    pub zero_span: bool,
    /// Seconds.
    pub sweep_time: Option<f64>,
    /// Trigger source and slope.
    pub trigger: Option<(AnalyzerTrigger, TriggerEdge)>,
}

/// Analyzer that records its settings and serves a canned trace.
#[derive(Debug, Clone)]
pub struct MockSpectrumAnalyzer {
    core: MockCore,
    settings: Arc<Mutex<AnalyzerSettings>>,
    trace: Arc<Mutex<Vec<f64>>>,
}

impl MockSpectrumAnalyzer {
    /// Serves a three-point trace with one peak.
    pub fn new(log: CallLog) -> Self {
        Self {
            core: MockCore::new(DeviceRole::SpectrumAnalyzer, log),
            settings: Arc::new(Mutex::new(AnalyzerSettings::default())),
            trace: Arc::new(Mutex::new(vec![-80.0, -42.5, -80.0])),
        }
    }

    /// Trace returned by subsequent fetches.
    pub fn set_trace(&self, trace: Vec<f64>) {
        *lock(&self.trace) = trace;
    }

    /// Current analyzer settings.
    pub fn settings(&self) -> AnalyzerSettings {
        *lock(&self.settings)
    }
}

mock_common!(MockSpectrumAnalyzer);

#[async_trait]
impl SpectrumAnalyzerDevice for MockSpectrumAnalyzer {
    async fn connect(&self) -> Result<()> {
        self.core.call("connect", String::new())
    }

    async fn disconnect(&self) -> Result<()> {
        self.core.call("disconnect", String::new())
    }

    async fn set_center_frequency(&self, hz: f64) -> Result<()> {
        self.core.call("set_center_frequency", hz.to_string())?;
        lock(&self.settings).center_frequency = Some(hz);
        Ok(())
    }

    async fn set_rbw_vbw(&self, rbw_hz: f64, vbw_hz: f64) -> Result<()> {
        self.core
            .call("set_rbw_vbw", format!("{} {}", rbw_hz, vbw_hz))?;
        let mut settings = lock(&self.settings);
        settings.rbw = Some(rbw_hz);
        settings.vbw = Some(vbw_hz);
        Ok(())
    }

    async fn enable_zero_span_mode(&self) -> Result<()> {
        self.core.call("enable_zero_span_mode", String::new())?;
        lock(&self.settings).zero_span = true;
        Ok(())
    }

    async fn set_sweep_time(&self, seconds: f64) -> Result<()> {
        self.core.call("set_sweep_time", seconds.to_string())?;
        lock(&self.settings).sweep_time = Some(seconds);
        Ok(())
    }

    async fn set_trigger(&self, mode: AnalyzerTrigger, edge: TriggerEdge) -> Result<()> {
        self.core
            .call("set_trigger", format!("{} {}", mode.scpi(), edge))?;
        lock(&self.settings).trigger = Some((mode, edge));
        Ok(())
    }

    async fn start_sweep(&self, continuous: bool) -> Result<()> {
        self.core.call("start_sweep", continuous.to_string())
    }

    async fn fetch_trace(&self) -> Result<Vec<f64>> {
        self.core.call("fetch_trace", String::new())?;
        Ok(lock(&self.trace).clone())
    }
}

// =============================================================================
// MockRig - all five roles on one log
// =============================================================================

/// A full set of mock instruments sharing one [`CallLog`].
#[derive(Debug, Clone)]
pub struct MockRig {
    /// Log every mock below writes to.
    pub log: CallLog,
    /// Laser role.
    pub laser: MockLaser,
    /// RF synthesizer role.
    pub rf_generator: MockRfGenerator,
    /// Wavemeter role.
    pub wavemeter: MockWavemeter,
    /// Signal generator role.
    pub signal_generator: MockSignalGenerator,
    /// Spectrum analyzer role.
    pub spectrum_analyzer: MockSpectrumAnalyzer,
}

impl MockRig {
    /// Rig whose signal generator enforces the limits of `choice`.
    pub fn new(choice: SignalGeneratorChoice) -> Self {
        let log = CallLog::new();
        Self {
            laser: MockLaser::new(log.clone()),
            rf_generator: MockRfGenerator::new(log.clone()),
            wavemeter: MockWavemeter::new(log.clone()),
            signal_generator: MockSignalGenerator::new(choice, log.clone()),
            spectrum_analyzer: MockSpectrumAnalyzer::new(log.clone()),
            log,
        }
    }

    /// Boxed clones for the controller; `self` keeps observing them.
    pub fn device_set(&self) -> DeviceSet {
        DeviceSet {
            laser: Box::new(self.laser.clone()),
            rf_generator: Box::new(self.rf_generator.clone()),
            wavemeter: Box::new(self.wavemeter.clone()),
            signal_generator: Box::new(self.signal_generator.clone()),
            spectrum_analyzer: Box::new(self.spectrum_analyzer.clone()),
        }
    }
}
