//! Experiment controller: owns every device session and sequences the
//! connect, configure, run and shutdown phases.

use crate::config::Settings;
use crate::error::{AppResult, BraggError, DeviceRole};
use crate::experiment::config::ExperimentConfig;
use crate::experiment::phase::{ExperimentPhase, SessionState};
use crate::experiment::run::{CancelToken, CaptureRecord, CaptureSink, RunPlan, RunSummary};
use crate::experiment::timing::DerivedTiming;
use crate::hardware::capabilities::{
    AnalyzerTrigger, DifferentialSweep, LaserDevice, RfGeneratorDevice, RfTriggerMode,
    SignalGeneratorDevice, SpectrumAnalyzerDevice, TriggerEdge, WavemeterDevice,
};
use crate::hardware::muquans::MuquansLaser;
use crate::hardware::rigol_sa::RigolDsa800;
use crate::hardware::signal_generator::{build_signal_generator, SignalGeneratorChoice};
use crate::hardware::wavemeter::HttpWavemeter;
use crate::hardware::windfreak::WindfreakSynthHd;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// A device failure tagged with where it happened.
type StepError = (DeviceRole, &'static str, anyhow::Error);

fn at(device: DeviceRole, operation: &'static str) -> impl FnOnce(anyhow::Error) -> StepError {
    move |source| (device, operation, source)
}

/// The five instruments, one per role.
pub struct DeviceSet {
    /// Seed laser and EDFA.
    pub laser: Box<dyn LaserDevice>,
    /// Dual-channel RF synthesizer.
    pub rf_generator: Box<dyn RfGeneratorDevice>,
    /// Wavemeter service.
    pub wavemeter: Box<dyn WavemeterDevice>,
    /// Red Pitaya or Tektronix AFG.
    pub signal_generator: Box<dyn SignalGeneratorDevice>,
    /// Spectrum analyzer.
    pub spectrum_analyzer: Box<dyn SpectrumAnalyzerDevice>,
}

impl DeviceSet {
    /// Real drivers addressed from `settings`. Nothing is opened yet.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            laser: Box::new(MuquansLaser::new(
                &settings.laser.host,
                settings.laser.port,
                settings.laser.timeout(),
            )),
            rf_generator: Box::new(
                WindfreakSynthHd::new(
                    &settings.rf_generator.port,
                    settings.rf_generator.baud_rate,
                    settings.rf_generator.timeout(),
                )
                .with_channel_power(settings.rf_generator.channel_power_dbm),
            ),
            wavemeter: Box::new(HttpWavemeter::new(
                &settings.wavemeter.base_url,
                settings.wavemeter.timeout(),
            )),
            signal_generator: build_signal_generator(&settings.signal_generator),
            spectrum_analyzer: Box::new(RigolDsa800::new(
                &settings.spectrum_analyzer.host,
                settings.spectrum_analyzer.port,
                settings.spectrum_analyzer.timeout(),
            )),
        }
    }

    async fn connect(&self, role: DeviceRole) -> anyhow::Result<()> {
        match role {
            DeviceRole::Laser => self.laser.connect().await,
            DeviceRole::RfGenerator => self.rf_generator.connect().await,
            DeviceRole::Wavemeter => self.wavemeter.connect().await,
            DeviceRole::SignalGenerator => self.signal_generator.connect().await,
            DeviceRole::SpectrumAnalyzer => self.spectrum_analyzer.connect().await,
        }
    }

    async fn disconnect(&self, role: DeviceRole) -> anyhow::Result<()> {
        match role {
            DeviceRole::Laser => self.laser.disconnect().await,
            DeviceRole::RfGenerator => self.rf_generator.disconnect().await,
            DeviceRole::Wavemeter => self.wavemeter.disconnect().await,
            DeviceRole::SignalGenerator => self.signal_generator.disconnect().await,
            DeviceRole::SpectrumAnalyzer => self.spectrum_analyzer.disconnect().await,
        }
    }
}

/// One teardown step that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    /// Role whose teardown step failed.
    pub device: DeviceRole,
    /// Teardown step, e.g. "laser_shutdown".
    pub operation: &'static str,
    /// Rendered driver error chain.
    pub error: String,
}

/// Everything that went wrong during `shutdown()`. Empty means a clean teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Failures in teardown order.
    pub failures: Vec<DeviceFailure>,
}

impl ShutdownReport {
    /// True when every teardown step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, device: DeviceRole, operation: &'static str, err: anyhow::Error) {
        warn!("{} {} failed during shutdown: {:#}", device, operation, err);
        self.failures.push(DeviceFailure {
            device,
            operation,
            error: format!("{:#}", err),
        });
    }
}

fn sweep_for(config: &ExperimentConfig) -> DifferentialSweep {
    DifferentialSweep {
        f_low: config.f_low,
        f_high: config.f_high,
        f_step: config.f_step,
        diff_freq: config.diff_freq,
        step_time: config.step_time,
        trigger_mode: RfTriggerMode::FullSweep,
    }
}

fn slot(role: DeviceRole) -> usize {
    match role {
        DeviceRole::Laser => 0,
        DeviceRole::RfGenerator => 1,
        DeviceRole::Wavemeter => 2,
        DeviceRole::SignalGenerator => 3,
        DeviceRole::SpectrumAnalyzer => 4,
    }
}

/// Orchestrates the five instruments through one temporal Bragg measurement.
///
/// The controller is the sole owner of every device session. Operations are
/// awaited strictly one after another; nothing runs in the background.
pub struct ExperimentController {
    choice: SignalGeneratorChoice,
    devices: DeviceSet,
    sessions: [SessionState; 5],
    phase: ExperimentPhase,
    active: Option<(ExperimentConfig, DerivedTiming)>,
    fault: Option<(DeviceRole, &'static str)>,
}

impl ExperimentController {
    /// Controller over the real instruments, with `choice` backing the signal
    /// generator role regardless of `settings.signal_generator.choice`.
    pub fn new(choice: SignalGeneratorChoice, settings: &Settings) -> Self {
        let mut settings = settings.clone();
        settings.signal_generator.choice = choice;
        Self::with_devices(choice, DeviceSet::from_settings(&settings))
    }

    /// Controller over caller-supplied devices. `choice` must describe the
    /// instrument behind `devices.signal_generator`; it sets the voltage limits
    /// used during validation.
    pub fn with_devices(choice: SignalGeneratorChoice, devices: DeviceSet) -> Self {
        Self {
            choice,
            devices,
            sessions: [SessionState::Unconnected; 5],
            phase: ExperimentPhase::Uninitialized,
            active: None,
            fault: None,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ExperimentPhase {
        self.phase
    }

    /// Instrument backing the signal generator role.
    pub fn choice(&self) -> SignalGeneratorChoice {
        self.choice
    }

    /// Session state of the device in `role`.
    pub fn session(&self, role: DeviceRole) -> SessionState {
        self.sessions[slot(role)]
    }

    /// Device and operation that faulted the controller, if any.
    pub fn fault(&self) -> Option<(DeviceRole, &'static str)> {
        self.fault
    }

    /// Configuration last applied by `set_experiment`.
    pub fn config(&self) -> Option<&ExperimentConfig> {
        self.active.as_ref().map(|(config, _)| config)
    }

    /// Timing derived from the applied configuration.
    pub fn timing(&self) -> Option<DerivedTiming> {
        self.active.as_ref().map(|(_, timing)| *timing)
    }

    fn require(&self, operation: &'static str, allowed: &[ExperimentPhase]) -> AppResult<()> {
        if allowed.contains(&self.phase) {
            return Ok(());
        }
        if let (ExperimentPhase::Faulted, Some((device, faulted_in))) = (self.phase, self.fault) {
            return Err(BraggError::Faulted {
                device,
                operation: faulted_in,
            });
        }
        Err(BraggError::InvalidPhase {
            phase: self.phase.name(),
            operation,
        })
    }

    fn enter(&mut self, phase: ExperimentPhase) {
        if self.phase != phase {
            info!("Controller phase {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Move to `Faulted` and turn the driver error into a `BraggError`.
    ///
    /// Range errors from a device are returned as they are.
    fn fault_with(&mut self, (device, operation, source): StepError) -> BraggError {
        error!("{} failed during '{}': {:#}", device, operation, source);
        self.fault = Some((device, operation));
        self.active = None;
        self.enter(ExperimentPhase::Faulted);
        match source.downcast::<BraggError>() {
            Ok(range @ BraggError::OutOfRange { .. }) => range,
            Ok(other) => BraggError::DeviceCommand {
                device,
                operation,
                source: other.into(),
            },
            Err(source) => BraggError::DeviceCommand {
                device,
                operation,
                source,
            },
        }
    }

    /// Open every device session in the fixed connection order.
    ///
    /// On the first failure, sessions opened so far are closed in reverse
    /// order, the controller becomes `Faulted` and the connection error is
    /// returned.
    pub async fn connect_all(&mut self) -> AppResult<()> {
        self.require("connect_all", &[ExperimentPhase::Uninitialized])?;
        info!("Connecting {} instruments ({})", DeviceRole::CONNECT_ORDER.len(), self.choice);

        for (index, role) in DeviceRole::CONNECT_ORDER.iter().copied().enumerate() {
            match self.devices.connect(role).await {
                Ok(()) => {
                    self.sessions[slot(role)] = SessionState::Connected;
                    debug!("{} connected", role);
                }
                Err(source) => {
                    error!("Failed to connect {}: {:#}", role, source);
                    for opened in DeviceRole::CONNECT_ORDER[..index].iter().rev().copied() {
                        if let Err(err) = self.devices.disconnect(opened).await {
                            warn!("Rollback disconnect of {} failed: {:#}", opened, err);
                        }
                        self.sessions[slot(opened)] = SessionState::Closed;
                    }
                    self.fault = Some((role, "connect"));
                    self.enter(ExperimentPhase::Faulted);
                    return Err(BraggError::Connection {
                        device: role,
                        source,
                    });
                }
            }
        }

        self.enter(ExperimentPhase::Connected);
        Ok(())
    }

    /// Validate `config`, derive timing and push it to every device.
    ///
    /// Validation failures, including the RF synthesizer's own sweep limits,
    /// are returned before any device is touched and leave the phase
    /// unchanged. Allowed from `Connected` and `Configured`.
    pub async fn set_experiment(&mut self, config: ExperimentConfig) -> AppResult<DerivedTiming> {
        self.require(
            "set_experiment",
            &[ExperimentPhase::Connected, ExperimentPhase::Configured],
        )?;
        config.validate(self.choice)?;
        let timing = DerivedTiming::from_config(&config)?;
        self.devices.rf_generator.check_sweep(&sweep_for(&config))?;
        info!(
            "Sweep {} steps, {:.6} s; trigger period {:.6} s",
            timing.sweep_steps, timing.sweep_duration, timing.trigger_period
        );

        if let Err(step) = self.push_configuration(&config, &timing).await {
            return Err(self.fault_with(step));
        }

        self.active = Some((config, timing));
        self.enter(ExperimentPhase::Configured);
        Ok(timing)
    }

    async fn push_configuration(
        &self,
        config: &ExperimentConfig,
        timing: &DerivedTiming,
    ) -> Result<(), StepError> {
        use DeviceRole::*;
        let d = &self.devices;

        d.laser
            .set_edfa_power(config.edfa_power)
            .await
            .map_err(at(Laser, "set_edfa_power"))?;

        d.rf_generator
            .configure_differential_sweep(&sweep_for(config))
            .await
            .map_err(at(RfGenerator, "configure_differential_sweep"))?;

        d.signal_generator
            .set_trigger_pulse(
                config.trigger_high,
                config.trigger_low,
                timing.trigger_period,
                config.trigger_duty,
            )
            .await
            .map_err(at(SignalGenerator, "set_trigger_pulse"))?;
        if let Some(volts) = config.dc_voltage {
            d.signal_generator
                .set_dc_voltage(volts)
                .await
                .map_err(at(SignalGenerator, "set_dc_voltage"))?;
        }

        let sa = &d.spectrum_analyzer;
        sa.set_center_frequency(config.sa_center_freq)
            .await
            .map_err(at(SpectrumAnalyzer, "set_center_frequency"))?;
        sa.set_rbw_vbw(config.rbw, config.vbw)
            .await
            .map_err(at(SpectrumAnalyzer, "set_rbw_vbw"))?;
        sa.enable_zero_span_mode()
            .await
            .map_err(at(SpectrumAnalyzer, "enable_zero_span_mode"))?;
        sa.set_sweep_time(config.sa_sweep_time)
            .await
            .map_err(at(SpectrumAnalyzer, "set_sweep_time"))?;
        sa.set_trigger(AnalyzerTrigger::External, TriggerEdge::Positive)
            .await
            .map_err(at(SpectrumAnalyzer, "set_trigger"))?;
        Ok(())
    }

    /// Drive the DC control output directly.
    ///
    /// A level outside the generator's range is refused with `OutOfRange`
    /// before anything is sent and does not fault the controller.
    pub async fn set_dc_voltage(&mut self, volts: f64) -> AppResult<()> {
        self.require(
            "set_dc_voltage",
            &[ExperimentPhase::Connected, ExperimentPhase::Configured],
        )?;
        match self.devices.signal_generator.set_dc_voltage(volts).await {
            Ok(()) => Ok(()),
            Err(err) => match err.downcast::<BraggError>() {
                Ok(range @ BraggError::OutOfRange { .. }) => Err(range),
                Ok(other) => Err(self.fault_with((
                    DeviceRole::SignalGenerator,
                    "set_dc_voltage",
                    other.into(),
                ))),
                Err(err) => Err(self.fault_with((
                    DeviceRole::SignalGenerator,
                    "set_dc_voltage",
                    err,
                ))),
            },
        }
    }

    /// Run the timed capture loop: one capture per trigger period, aligned to
    /// the moment the pulse train is armed.
    ///
    /// Returns to `Configured` when the plan completes, is cancelled, or the
    /// sink rejects a record. Device failures fault the controller.
    pub async fn run_experiment(
        &mut self,
        plan: &RunPlan,
        sink: &mut dyn CaptureSink,
        cancel: &CancelToken,
    ) -> AppResult<RunSummary> {
        self.require("run_experiment", &[ExperimentPhase::Configured])?;
        let (config, timing) = match &self.active {
            Some((config, timing)) => (config.clone(), *timing),
            None => {
                return Err(BraggError::InvalidPhase {
                    phase: self.phase.name(),
                    operation: "run_experiment",
                })
            }
        };
        plan.validate(self.choice)?;
        let period = timing.trigger_period_duration()?;
        let run_length = period.checked_mul(plan.cycles);
        if run_length.and_then(|total| Instant::now().checked_add(total)).is_none() {
            return Err(BraggError::configuration(
                "cycles",
                format!(
                    "{} cycles of {:.6} s do not fit in the timer range",
                    plan.cycles, timing.trigger_period
                ),
            ));
        }

        self.enter(ExperimentPhase::Running);
        let result = self
            .capture_loop(&config, &timing, period, plan, sink, cancel)
            .await;
        match result {
            Ok(summary) => {
                self.enter(ExperimentPhase::Configured);
                info!(
                    "Run finished: {} of {} cycles{}",
                    summary.cycles_completed,
                    plan.cycles,
                    if summary.cancelled { " (cancelled)" } else { "" }
                );
                Ok(summary)
            }
            Err(LoopError::Device(step)) => Err(self.fault_with(step)),
            Err(LoopError::Stop(err)) => {
                self.enter(ExperimentPhase::Configured);
                Err(err)
            }
        }
    }

    async fn capture_loop(
        &self,
        config: &ExperimentConfig,
        timing: &DerivedTiming,
        period: Duration,
        plan: &RunPlan,
        sink: &mut dyn CaptureSink,
        cancel: &CancelToken,
    ) -> Result<RunSummary, LoopError> {
        use DeviceRole::*;
        let d = &self.devices;

        d.laser
            .seed_on()
            .await
            .map_err(at(Laser, "seed_on"))?;
        d.signal_generator
            .set_trigger_pulse(
                config.trigger_high,
                config.trigger_low,
                timing.trigger_period,
                config.trigger_duty,
            )
            .await
            .map_err(at(SignalGenerator, "set_trigger_pulse"))?;
        let sweep_start = Instant::now();

        let mut summary = RunSummary {
            cycles_completed: 0,
            cancelled: false,
        };
        for cycle in 0..plan.cycles {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let deadline = period
                .checked_mul(cycle)
                .and_then(|offset| sweep_start.checked_add(offset))
                .ok_or_else(|| {
                    LoopError::Stop(BraggError::configuration(
                        "cycles",
                        format!("cycle {} is beyond the timer range", cycle),
                    ))
                })?;
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
            }

            let dc_voltage = plan.dc_voltage_at(cycle);
            if let Some(volts) = dc_voltage {
                d.signal_generator
                    .set_dc_voltage(volts)
                    .await
                    .map_err(at(SignalGenerator, "set_dc_voltage"))?;
            }
            d.spectrum_analyzer
                .start_sweep(false)
                .await
                .map_err(at(SpectrumAnalyzer, "start_sweep"))?;
            let laser_frequency_hz = d
                .wavemeter
                .get_frequency(plan.wavemeter_channel)
                .await
                .map_err(at(Wavemeter, "get_frequency"))?;
            let trace = d
                .spectrum_analyzer
                .fetch_trace()
                .await
                .map_err(at(SpectrumAnalyzer, "fetch_trace"))?;

            let record = CaptureRecord {
                cycle,
                offset: sweep_start.elapsed(),
                dc_voltage,
                laser_frequency_hz,
                trace,
                timestamp: Utc::now(),
            };
            sink.on_capture(&record)
                .await
                .map_err(|source| LoopError::Stop(BraggError::CaptureSink { cycle, source }))?;
            summary.cycles_completed += 1;
        }
        Ok(summary)
    }

    /// Tear down every open session in reverse connection order.
    ///
    /// Never fails: each device is attempted regardless of earlier errors and
    /// every failure is collected in the report. The laser is put in its safe
    /// state (EDFA off, seed off) before its session is closed. Calling this
    /// again after `ShutDown` is a no-op.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.phase == ExperimentPhase::ShutDown {
            return report;
        }
        info!("Shutting down from phase {}", self.phase);

        for role in DeviceRole::CONNECT_ORDER.iter().rev().copied() {
            if self.sessions[slot(role)] != SessionState::Connected {
                continue;
            }
            if role == DeviceRole::Laser {
                if let Err(err) = self.devices.laser.shutdown().await {
                    report.record(role, "shutdown", err);
                }
            }
            if let Err(err) = self.devices.disconnect(role).await {
                report.record(role, "disconnect", err);
            }
            self.sessions[slot(role)] = SessionState::Closed;
        }

        self.active = None;
        self.enter(ExperimentPhase::ShutDown);
        if report.is_clean() {
            info!("All devices shut down");
        } else {
            warn!("Shutdown completed with {} failure(s)", report.failures.len());
        }
        report
    }
}

/// Why the capture loop ended early.
enum LoopError {
    /// A device failed; the controller faults.
    Device(StepError),
    /// The run stopped without a device failure; back to `Configured`.
    Stop(BraggError),
}

impl From<StepError> for LoopError {
    fn from(step: StepError) -> Self {
        LoopError::Device(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockRig;

    fn rig() -> (MockRig, ExperimentController) {
        let rig = MockRig::new(SignalGeneratorChoice::RedPitaya);
        let controller =
            ExperimentController::with_devices(SignalGeneratorChoice::RedPitaya, rig.device_set());
        (rig, controller)
    }

    #[tokio::test]
    async fn test_happy_path_phases() {
        let (rig, mut controller) = rig();
        assert_eq!(controller.phase(), ExperimentPhase::Uninitialized);

        controller.connect_all().await.unwrap();
        assert_eq!(controller.phase(), ExperimentPhase::Connected);
        for role in DeviceRole::CONNECT_ORDER {
            assert_eq!(controller.session(role), SessionState::Connected);
        }

        let timing = controller
            .set_experiment(ExperimentConfig::default())
            .await
            .unwrap();
        assert_eq!(controller.phase(), ExperimentPhase::Configured);
        assert_eq!(controller.timing(), Some(timing));
        assert_eq!(rig.laser.edfa_power(), 1.0);

        let report = controller.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(controller.phase(), ExperimentPhase::ShutDown);
        assert_eq!(controller.session(DeviceRole::Laser), SessionState::Closed);
        assert!(controller.config().is_none());
    }

    #[tokio::test]
    async fn test_run_before_configure_is_invalid_phase() {
        let (_rig, mut controller) = rig();
        controller.connect_all().await.unwrap();
        let mut sink = crate::experiment::run::CollectingSink::default();
        let err = controller
            .run_experiment(&RunPlan::default(), &mut sink, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BraggError::InvalidPhase {
                phase: "Connected",
                operation: "run_experiment"
            }
        ));
        assert_eq!(controller.phase(), ExperimentPhase::Connected);
    }

    #[tokio::test]
    async fn test_connect_twice_is_invalid_phase() {
        let (_rig, mut controller) = rig();
        controller.connect_all().await.unwrap();
        assert!(matches!(
            controller.connect_all().await,
            Err(BraggError::InvalidPhase { .. })
        ));
        assert_eq!(controller.phase(), ExperimentPhase::Connected);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let (rig, mut controller) = rig();
        controller.connect_all().await.unwrap();
        controller.shutdown().await;
        let calls = rig.log.len();
        assert!(controller.shutdown().await.is_clean());
        assert_eq!(rig.log.len(), calls);
    }

    #[tokio::test]
    async fn test_shutdown_before_connect() {
        let (rig, mut controller) = rig();
        assert!(controller.shutdown().await.is_clean());
        assert!(rig.log.is_empty());
        assert_eq!(controller.phase(), ExperimentPhase::ShutDown);
        assert!(matches!(
            controller.connect_all().await,
            Err(BraggError::InvalidPhase { phase: "ShutDown", .. })
        ));
    }
}
