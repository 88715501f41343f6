//! Temporal Bragg operator script
//!
//! Connects every instrument, applies the configured experiment, runs the
//! capture loop and always shuts the bench down afterwards.
//!
//! # Usage
//!
//! ```bash
//! # Validate settings and print derived timing, no hardware access
//! bragg --config config/bragg.toml --dry-run
//!
//! # Full run on the AFG with a DC ramp over 10 cycles
//! bragg --signal-generator tektro-afg --cycles 10 --ramp -1.0:1.0
//! ```
//!
//! Ctrl-C cancels the run between capture cycles; shutdown still happens.

use anyhow::{anyhow, Context, Result};
use bragg_daq::config::Settings;
use bragg_daq::experiment::{
    CancelToken, DcRamp, DerivedTiming, ExperimentController, LoggingSink,
};
use bragg_daq::hardware::SignalGeneratorChoice;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GeneratorArg {
    /// Red Pitaya (0..1.8 V)
    RedPitaya,
    /// Tektronix AFG3000C (-5..5 V)
    TektroAfg,
}

impl From<GeneratorArg> for SignalGeneratorChoice {
    fn from(arg: GeneratorArg) -> Self {
        match arg {
            GeneratorArg::RedPitaya => SignalGeneratorChoice::RedPitaya,
            GeneratorArg::TektroAfg => SignalGeneratorChoice::TektroAfg,
        }
    }
}

/// Temporal Bragg experiment - laser, RF sweep, trigger and zero-span capture
#[derive(Parser, Debug)]
#[command(name = "bragg")]
#[command(about = "Run a temporal Bragg measurement")]
struct Args {
    /// Settings file (TOML); BRAGG_* environment variables override it
    #[arg(long, default_value = "config/bragg.toml")]
    config: PathBuf,

    /// Signal generator backing the trigger/DC role (overrides the settings file)
    #[arg(long, value_enum)]
    signal_generator: Option<GeneratorArg>,

    /// Number of trigger periods to capture
    #[arg(long)]
    cycles: Option<u32>,

    /// DC control ramp across the cycles, as START:STOP in volts
    #[arg(long, value_parser = parse_ramp, allow_hyphen_values = true)]
    ramp: Option<DcRamp>,

    /// Validate settings and print derived timing without touching hardware
    #[arg(long)]
    dry_run: bool,
}

fn parse_ramp(text: &str) -> Result<DcRamp, String> {
    let (start, stop) = text
        .split_once(':')
        .ok_or_else(|| format!("expected START:STOP, got '{}'", text))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid voltage '{}': {}", value, e))
    };
    Ok(DcRamp {
        start: parse(start)?,
        stop: parse(stop)?,
    })
}

fn print_timing(timing: &DerivedTiming) {
    println!("Sweep steps:     {}", timing.sweep_steps);
    println!("Sweep duration:  {:.6} s", timing.sweep_duration);
    println!("Trigger period:  {:.6} s", timing.trigger_period);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_from(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    if let Some(generator) = args.signal_generator {
        settings.signal_generator.choice = generator.into();
    }
    if let Some(cycles) = args.cycles {
        settings.run.cycles = cycles;
    }
    if args.ramp.is_some() {
        settings.run.dc_ramp = args.ramp;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let choice = settings.signal_generator.choice;
    settings.experiment.validate(choice)?;
    settings.run.validate(choice)?;
    let timing = DerivedTiming::from_config(&settings.experiment)?;

    if args.dry_run {
        println!("{} with {}: settings valid", settings.application.name, choice);
        print_timing(&timing);
        println!("Cycles:          {}", settings.run.cycles);
        return Ok(());
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, cancelling after the current cycle");
                cancel.cancel();
            }
        });
    }

    let address = settings.signal_generator.selected();
    info!(
        "Signal generator {} at {}:{}",
        choice, address.host, address.port
    );
    let mut controller = ExperimentController::new(choice, &settings);
    let outcome = run(&mut controller, &settings, &cancel).await;

    let report = controller.shutdown().await;
    for failure in &report.failures {
        error!(
            "Shutdown: {} {} failed: {}",
            failure.device, failure.operation, failure.error
        );
    }

    outcome?;
    if !report.is_clean() {
        return Err(anyhow!(
            "{} device(s) failed to shut down cleanly",
            report.failures.len()
        ));
    }
    Ok(())
}

async fn run(
    controller: &mut ExperimentController,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<()> {
    controller.connect_all().await?;
    let timing = controller.set_experiment(settings.experiment.clone()).await?;
    print_timing(&timing);

    let mut sink = LoggingSink;
    let summary = controller
        .run_experiment(&settings.run, &mut sink, cancel)
        .await?;
    info!(
        "Captured {} cycle(s){}",
        summary.cycles_completed,
        if summary.cancelled { ", cancelled" } else { "" }
    );
    Ok(())
}
