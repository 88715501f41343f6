//! Timed capture loop: one capture per trigger period, ramps, cancellation
//! and failure handling. Uses tokio's paused clock so timing is exact.

use anyhow::{bail, Result};
use async_trait::async_trait;
use bragg_daq::error::{BraggError, DeviceRole};
use bragg_daq::experiment::{
    CancelToken, CaptureRecord, CaptureSink, CollectingSink, DcRamp, ExperimentConfig,
    ExperimentController, ExperimentPhase, RunPlan,
};
use bragg_daq::hardware::mock::MockRig;
use bragg_daq::hardware::SignalGeneratorChoice;
use std::time::Duration;

fn reference_config() -> ExperimentConfig {
    ExperimentConfig {
        edfa_power: 1.2,
        f_low: 800e6,
        f_high: 2500e6,
        f_step: 5e6,
        diff_freq: 10e6,
        step_time: 2e-3,
        trigger_high: 1.8,
        trigger_low: 0.0,
        trigger_duty: 90.0,
        dc_voltage: None,
        sa_center_freq: 10e6,
        rbw: 1e3,
        vbw: 1e3,
        sa_sweep_time: 2.0,
    }
}

async fn configured() -> (MockRig, ExperimentController) {
    let rig = MockRig::new(SignalGeneratorChoice::RedPitaya);
    let mut controller =
        ExperimentController::with_devices(SignalGeneratorChoice::RedPitaya, rig.device_set());
    controller.connect_all().await.unwrap();
    controller.set_experiment(reference_config()).await.unwrap();
    rig.log.clear();
    (rig, controller)
}

fn plan(cycles: u32) -> RunPlan {
    RunPlan {
        cycles,
        dc_ramp: None,
        wavemeter_channel: 3,
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_capture_per_trigger_period() {
    let (rig, mut controller) = configured().await;
    let period = controller.timing().unwrap().trigger_period_duration().unwrap();
    assert!((period.as_secs_f64() - 0.748).abs() < 1e-9);

    let mut sink = CollectingSink::default();
    let summary = controller
        .run_experiment(&plan(4), &mut sink, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(summary.cycles_completed, 4);
    assert!(!summary.cancelled);
    assert_eq!(controller.phase(), ExperimentPhase::Configured);

    let calls = rig.log.calls();
    assert_eq!(calls[0].operation, "seed_on");
    assert_eq!(calls[1].operation, "set_trigger_pulse");
    let armed = calls[1].at;

    let sweeps: Vec<_> = calls
        .iter()
        .filter(|call| call.operation == "start_sweep")
        .map(|call| call.at)
        .collect();
    assert_eq!(sweeps.len(), 4);
    for (k, at) in sweeps.iter().enumerate() {
        assert_eq!(*at - armed, period * k as u32);
    }

    let offsets: Vec<_> = sink.records.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![Duration::ZERO, period, period * 2, period * 3]);
    let cycles: Vec<_> = sink.records.iter().map(|r| r.cycle).collect();
    assert_eq!(cycles, vec![0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_armed_before_every_trace_read() {
    let (rig, mut controller) = configured().await;
    let mut sink = CollectingSink::default();
    controller
        .run_experiment(&plan(2), &mut sink, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        rig.log.operations(),
        vec![
            (DeviceRole::Laser, "seed_on"),
            (DeviceRole::SignalGenerator, "set_trigger_pulse"),
            (DeviceRole::SpectrumAnalyzer, "start_sweep"),
            (DeviceRole::Wavemeter, "get_frequency"),
            (DeviceRole::SpectrumAnalyzer, "fetch_trace"),
            (DeviceRole::SpectrumAnalyzer, "start_sweep"),
            (DeviceRole::Wavemeter, "get_frequency"),
            (DeviceRole::SpectrumAnalyzer, "fetch_trace"),
        ]
    );
    let wavemeter_channels: Vec<_> = rig
        .log
        .calls()
        .into_iter()
        .filter(|call| call.operation == "get_frequency")
        .map(|call| call.detail)
        .collect();
    assert_eq!(wavemeter_channels, vec!["3", "3"]);
}

#[tokio::test(start_paused = true)]
async fn test_records_carry_measurements() {
    let (rig, mut controller) = configured().await;
    rig.wavemeter.set_frequency(384.2304e12);
    rig.spectrum_analyzer.set_trace(vec![-90.0, -35.0, -88.5]);

    let mut sink = CollectingSink::default();
    controller
        .run_experiment(&plan(1), &mut sink, &CancelToken::new())
        .await
        .unwrap();

    let record = &sink.records[0];
    assert_eq!(record.laser_frequency_hz, 384.2304e12);
    assert_eq!(record.trace, vec![-90.0, -35.0, -88.5]);
    assert_eq!(record.dc_voltage, None);
}

#[tokio::test(start_paused = true)]
async fn test_dc_ramp_across_cycles() {
    let (rig, mut controller) = configured().await;
    let plan = RunPlan {
        cycles: 3,
        dc_ramp: Some(DcRamp {
            start: 0.0,
            stop: 1.8,
        }),
        wavemeter_channel: 1,
    };
    let mut sink = CollectingSink::default();
    controller
        .run_experiment(&plan, &mut sink, &CancelToken::new())
        .await
        .unwrap();

    let volts: Vec<f64> = sink.records.iter().filter_map(|r| r.dc_voltage).collect();
    assert_eq!(volts.len(), 3);
    for (got, want) in volts.iter().zip([0.0, 0.9, 1.8]) {
        assert!((got - want).abs() < 1e-12);
    }
    let last = rig.signal_generator.dc_voltage().unwrap();
    assert!((last - 1.8).abs() < 1e-12);
}

#[tokio::test]
async fn test_ramp_outside_generator_range_rejected_before_io() {
    let (rig, mut controller) = configured().await;
    let plan = RunPlan {
        cycles: 3,
        dc_ramp: Some(DcRamp {
            start: 0.0,
            stop: 2.5,
        }),
        wavemeter_channel: 3,
    };
    let mut sink = CollectingSink::default();
    let err = controller
        .run_experiment(&plan, &mut sink, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BraggError::Configuration {
            field: "dc_ramp.stop",
            ..
        }
    ));
    assert!(rig.log.is_empty());
    assert_eq!(controller.phase(), ExperimentPhase::Configured);
}

/// Cancels the token once `after` records have been seen.
struct CancelAfter {
    token: CancelToken,
    after: usize,
    inner: CollectingSink,
}

#[async_trait]
impl CaptureSink for CancelAfter {
    async fn on_capture(&mut self, record: &CaptureRecord) -> Result<()> {
        self.inner.on_capture(record).await?;
        if self.inner.records.len() >= self.after {
            self.token.cancel();
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_between_cycles() {
    let (rig, mut controller) = configured().await;
    let cancel = CancelToken::new();
    let mut sink = CancelAfter {
        token: cancel.clone(),
        after: 2,
        inner: CollectingSink::default(),
    };

    let summary = controller
        .run_experiment(&plan(10), &mut sink, &cancel)
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.cycles_completed, 2);
    assert_eq!(sink.inner.records.len(), 2);
    assert_eq!(rig.log.for_device(DeviceRole::SpectrumAnalyzer).len(), 4);
    assert_eq!(controller.phase(), ExperimentPhase::Configured);

    // The controller can run again with a fresh token.
    let mut sink = CollectingSink::default();
    let summary = controller
        .run_experiment(&plan(1), &mut sink, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(summary.cycles_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_wait() {
    let (_rig, mut controller) = configured().await;
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            // Between the second (0.748 s) and third (1.496 s) trigger.
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
    }

    let start = tokio::time::Instant::now();
    let mut sink = CollectingSink::default();
    let summary = controller
        .run_experiment(&plan(5), &mut sink, &cancel)
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.cycles_completed, 2);
    assert!(start.elapsed() < Duration::from_secs_f64(1.496));
}

#[tokio::test]
async fn test_cancelled_before_start_captures_nothing() {
    let (rig, mut controller) = configured().await;
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut sink = CollectingSink::default();
    let summary = controller
        .run_experiment(&plan(3), &mut sink, &cancel)
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.cycles_completed, 0);
    assert!(rig
        .log
        .for_device(DeviceRole::SpectrumAnalyzer)
        .is_empty());
}

struct FailingSink;

#[async_trait]
impl CaptureSink for FailingSink {
    async fn on_capture(&mut self, record: &CaptureRecord) -> Result<()> {
        if record.cycle == 1 {
            bail!("disk full");
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_stops_run_without_fault() {
    let (_rig, mut controller) = configured().await;
    let err = controller
        .run_experiment(&plan(4), &mut FailingSink, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BraggError::CaptureSink { cycle: 1, .. }));
    assert!(err.to_string().contains("disk full"));
    assert_eq!(controller.phase(), ExperimentPhase::Configured);
}

#[tokio::test(start_paused = true)]
async fn test_device_failure_mid_run_faults() {
    let (rig, mut controller) = configured().await;
    rig.spectrum_analyzer.fail_on("fetch_trace");

    let mut sink = CollectingSink::default();
    let err = controller
        .run_experiment(&plan(3), &mut sink, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BraggError::DeviceCommand {
            device: DeviceRole::SpectrumAnalyzer,
            operation: "fetch_trace",
            ..
        }
    ));
    assert!(sink.records.is_empty());
    assert_eq!(controller.phase(), ExperimentPhase::Faulted);

    let report = controller.shutdown().await;
    assert!(report.is_clean());
    assert!(!rig.laser.seed_is_on());
}

#[tokio::test]
async fn test_zero_cycles_rejected() {
    let (_rig, mut controller) = configured().await;
    let mut sink = CollectingSink::default();
    assert!(matches!(
        controller
            .run_experiment(&plan(0), &mut sink, &CancelToken::new())
            .await,
        Err(BraggError::Configuration {
            field: "cycles",
            ..
        })
    ));
}

#[tokio::test]
async fn test_run_longer_than_timer_range_rejected() {
    let rig = MockRig::new(SignalGeneratorChoice::TektroAfg);
    let mut controller =
        ExperimentController::with_devices(SignalGeneratorChoice::TektroAfg, rig.device_set());
    controller.connect_all().await.unwrap();
    // 1e9 steps of 1e6 s: a 1.1e15 s period is valid, 1e5 of them are not.
    let slow = ExperimentConfig {
        f_low: 0.0,
        f_high: 1e9,
        f_step: 1.0,
        step_time: 1e6,
        ..reference_config()
    };
    controller.set_experiment(slow).await.unwrap();
    rig.log.clear();

    let mut sink = CollectingSink::default();
    let err = controller
        .run_experiment(&plan(100_000), &mut sink, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BraggError::Configuration {
            field: "cycles",
            ..
        }
    ));
    assert!(rig.log.is_empty());
    assert_eq!(controller.phase(), ExperimentPhase::Configured);
}
