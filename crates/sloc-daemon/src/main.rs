//! Sound locator daemon entry point.
//!
//! Brings up the simulated capture unit and PWM timer, starts the tick
//! context on a dedicated thread, arms the servo and then runs the actuation
//! controller in the main thread.

mod source;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sloc_common::config::ControllerConfig;
use sloc_common::state::{RuntimeState, StateMachine};
use sloc_hal::{Actuator, EdgeCapture, SimulatedCapture, TimerPwm};
use sloc_runtime::controller::{ActuationController, ControlStats, StepOutcome};
use sloc_runtime::{ControlContext, PhaseEstimator, TickDriver, TickHandler};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::source::SweepSource;

/// Sound locator command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "sloc-daemon",
    about = "Sound locator - steers a servo toward a sound source from two microphones",
    version,
    long_about = None
)]
struct Args {
    /// Path to a controller configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this many servo commands (0 = run forever).
    #[arg(long, default_value = "0")]
    max_commands: u64,

    /// Do not start the synthetic sound source.
    #[arg(long)]
    no_source: bool,

    /// Sweep period of the synthetic sound source.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    sweep_period: Duration,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting sound locator");

    let mut machine = StateMachine::new();
    start(&args, &mut machine)
}

/// Load the configuration and run the daemon.
///
/// Any error leaves `machine` in FAULT; `main` returns it, so the process
/// exits non-zero.
fn start(args: &Args, machine: &mut StateMachine) -> Result<()> {
    let result = load_config(args).and_then(|config| run_daemon(&config, args, machine));
    record_failure(machine, result)
}

/// Move the lifecycle to FAULT if `result` is an error.
fn record_failure(machine: &mut StateMachine, result: Result<()>) -> Result<()> {
    if let Err(e) = &result {
        machine.enter_fault();
        error!(state = %machine.state(), error = %format!("{e:#}"), "Startup failed");
    }
    result
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "sloc_daemon={level},sloc_runtime={level},sloc_hal={level},sloc_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `SLOC_CONFIG_PATH` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<ControllerConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ControllerConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("SLOC_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from SLOC_CONFIG_PATH");
            return ControllerConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from SLOC_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "SLOC_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return ControllerConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(ControllerConfig::default())
}

/// Bring up devices and run the two execution contexts.
fn run_daemon(config: &ControllerConfig, args: &Args, machine: &mut StateMachine) -> Result<()> {
    let mut capture = SimulatedCapture::new();
    capture
        .init()
        .context("Failed to initialize capture unit")?;

    let mut pwm = TimerPwm::new(config.pwm.clock_hz);
    pwm.init().context("Failed to initialize PWM timer")?;

    machine.transition(RuntimeState::Init)?;
    info!(
        ticks_per_ms = config.timing.ticks_per_ms,
        rt_priority = ?config.timing.rt_priority,
        max_valid_separation = config.estimator.max_valid_separation,
        settle = %humantime::format_duration(config.servo.settle_delay),
        "Devices initialized"
    );

    let ctx = ControlContext::from_config(config);
    let handler = TickHandler::new(
        &ctx,
        &capture,
        PhaseEstimator::new(config.estimator.max_valid_separation),
    )?;
    let driver = TickDriver::new(&config.timing);
    let source = (!args.no_source).then(|| {
        SweepSource::new(config.estimator.max_valid_separation, args.sweep_period)
    });

    std::thread::scope(|s| -> Result<()> {
        let ticker = s.spawn(|| driver.run(&handler));
        let feeder = source.as_ref().map(|src| {
            let capture = &capture;
            s.spawn(move || src.run(capture))
        });

        let outcome = drive(&ctx, pwm, config, args.max_commands, machine);

        // Only reached for bounded runs or a failed arm
        driver.halt();
        if let Some(src) = &source {
            src.halt();
        }
        let metrics = ticker
            .join()
            .map_err(|_| anyhow!("tick thread panicked"))?;
        if let Some(feeder) = feeder {
            feeder
                .join()
                .map_err(|_| anyhow!("source thread panicked"))?;
        }

        let stats = outcome?;
        let estimator = ctx.stats.snapshot();
        info!(
            ticks = metrics.total_ticks(),
            mean_ns = metrics.mean().map(|d| d.as_nanos()).unwrap_or(0),
            max_ns = metrics.max().map(|d| d.as_nanos()).unwrap_or(0),
            overruns = metrics.overrun_count(),
            late = metrics.late_count(),
            uptime_ms = ctx.time_base.now_ms(),
            "Tick statistics"
        );
        info!(
            committed = estimator.committed,
            ties = estimator.ties,
            discarded = estimator.discarded,
            capture_errors = estimator.capture_errors,
            issued = stats.issued,
            rejected = stats.rejected,
            "Sound locator stopped"
        );
        Ok(())
    })
}

/// Arm the servo and run the control loop.
///
/// Never returns when `max_commands` is zero.
fn drive(
    ctx: &ControlContext,
    pwm: TimerPwm,
    config: &ControllerConfig,
    max_commands: u64,
    machine: &mut StateMachine,
) -> Result<ControlStats> {
    let mut controller =
        ActuationController::arm(ctx, pwm, &config.servo).context("Failed to arm servo")?;
    machine.transition(RuntimeState::Run)?;
    info!(state = %machine.state(), "Control loop running");

    if max_commands == 0 {
        controller.run();
    }

    let mut attempts = 0u64;
    controller.run_until(|outcome| {
        if *outcome != StepOutcome::Unchanged {
            attempts += 1;
        }
        attempts >= max_commands
    });
    info!(commands = attempts, "Maximum command count reached");

    Ok(controller.stats())
}
