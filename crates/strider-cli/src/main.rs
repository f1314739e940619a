//! `strider-cli` – Strider Command Line Interface
//!
//! This binary is the ignition switch for the Strider locomotion stack.  It:
//!
//! 1. Loads `~/.strider/config.toml` (or `--config <path>`), falling back to
//!    defaults, and applies `STRIDER_*` environment overrides.
//! 2. Wires the motion controller, sensor feed and decision scheduler.  Only
//!    the simulated drivers are built in, so `--sim` is required.
//! 3. Arms the controller once the first valid sensor reading arrives.
//! 4. Intercepts **Ctrl-C** to latch the emergency stop and shut down safely.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use colored::Colorize;
use tokio::sync::watch;
use tracing::{info, warn};

use strider_hal::{SimActuator, SimCamera, SimSensor};
use strider_kernel::{ControllerHandle, SafetyGate};
use strider_middleware::EventBus;
use strider_runtime::{
    DecisionScheduler, DecisionSource, ScriptedSource, StatsSnapshot, VisionDriver,
    init_tracing, run_sensor_feed,
};
use strider_types::StriderError;

/// How long to wait for the first valid sensor reading before giving up.
const ARM_TIMEOUT: Duration = Duration::from_secs(5);
const ARM_RETRY: Duration = Duration::from_millis(50);
const BACKEND_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "strider")]
#[command(version)]
#[command(about = "Safety-gated locomotion controller driven by navigation decisions")]
#[command(long_about = None)]
struct Args {
    /// Run against simulated actuator, sensor and camera drivers.
    #[arg(long)]
    sim: bool,

    /// Config file to load instead of `~/.strider/config.toml`.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Where navigation decisions come from.
    #[arg(long, value_enum, default_value_t = DecisionMode::Scripted)]
    decisions: DecisionMode,

    /// Write a config file with every default value and exit.
    #[arg(long)]
    write_default_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DecisionMode {
    /// Replay a fixed patrol script.
    Scripted,
    /// Ask the `[vision]` model about the camera frame.
    Vision,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // ── Structured logging ────────────────────────────────────────────────
    // The operator-facing output still uses println! for UX consistency.
    let _tracing = init_tracing("strider", &args.log_level);

    if args.write_default_config {
        let path = args.config.clone().unwrap_or_else(config::config_path);
        return match config::save_to(&config::Config::default(), &path) {
            Ok(()) => {
                println!("{} {}", "✓ Default config written to".green(), path.display().to_string().bold());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Config error".red(), e);
                ExitCode::FAILURE
            }
        };
    }

    let cfg = match config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    if !args.sim {
        eprintln!(
            "{} no hardware drivers are built into this binary; run with {}.",
            "error:".red().bold(),
            "--sim".bold()
        );
        return ExitCode::FAILURE;
    }

    print_banner();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_simulation(cfg, args.decisions)) {
        Ok(stats) => {
            println!();
            println!("  {}", "Run summary".bold());
            println!("  {}", stats);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run_simulation(cfg: config::Config, mode: DecisionMode) -> Result<StatsSnapshot, String> {
    let bus = EventBus::default();
    let controller = ControllerHandle::new(
        SafetyGate::new(cfg.safety),
        cfg.limits,
        Box::new(SimActuator::new("sim-legs")),
    );
    let source: Arc<dyn DecisionSource> = match mode {
        DecisionMode::Scripted => Arc::new(ScriptedSource::patrol()),
        DecisionMode::Vision => {
            let driver = vision_driver(&cfg);
            check_vision_backend(&driver).await?;
            Arc::new(driver)
        }
    };

    // ── Shutdown signal ───────────────────────────────────────────────────
    // The sender is shared with the Ctrl-C handler; dropping it would read as
    // a shutdown request.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let estop = controller.emergency_stop();
    let handler_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – latching emergency stop …".yellow().bold());
        estop.trigger("operator interrupt");
        let _ = handler_tx.send(true);
        println!("{}", "  ✓ Emergency stop latched.".green());
        println!("{}", "  ✓ Stopping Strider.".green());
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; emergency stop on Ctrl-C will not be available");
    }

    let feed = tokio::spawn(run_sensor_feed(
        Box::new(SimSensor::nominal("sim-imu")),
        controller.clone(),
        bus.clone(),
        cfg.sensor.period(),
        shutdown_rx.clone(),
    ));

    if let Err(e) = arm(&controller).await {
        controller.emergency_stop().trigger("arming failed");
        let _ = shutdown_tx.send(true);
        let _ = feed.await;
        return Err(format!("controller not armed: {e}"));
    }
    print_arm_status(&controller, source.name());

    let scheduler = DecisionScheduler::new(
        controller.clone(),
        source,
        cfg.commands,
        cfg.scheduler,
        bus,
    );
    scheduler.run(shutdown_rx).await;

    if let Err(e) = feed.await {
        warn!(error = %e, "Sensor feed terminated abnormally");
    }
    Ok(scheduler.stats().snapshot())
}

fn vision_driver(cfg: &config::Config) -> VisionDriver {
    let mut driver = VisionDriver::new(
        cfg.vision.base_url.as_str(),
        cfg.vision.model.as_str(),
        Box::new(SimCamera::new("sim-camera")),
    )
    .with_min_interval(cfg.vision.min_request_interval());
    if let Some(key) = cfg.vision.api_key() {
        driver = driver.with_api_key(key);
    }
    info!(url = %cfg.vision.base_url, model = %cfg.vision.model, "Vision decision source configured");
    driver
}

/// Refuse to start when the vision backend cannot be reached.  A missing
/// model is only a warning: some servers load models on first use.
async fn check_vision_backend(driver: &VisionDriver) -> Result<(), String> {
    print!("  Checking vision backend … ");
    match driver.list_models(BACKEND_CHECK_TIMEOUT).await {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            if !driver.serves_model(&models) {
                println!(
                    "  {} model {} is not listed by the server",
                    "warning:".yellow().bold(),
                    driver.model().bold()
                );
                warn!(model = driver.model(), "Configured vision model not listed by server");
            }
            Ok(())
        }
        Err(e) => {
            println!("{}", "offline".red());
            Err(format!("vision backend unreachable: {e}"))
        }
    }
}

/// Release the startup latch once the sensor feed has delivered a reading.
async fn arm(controller: &ControllerHandle) -> Result<(), StriderError> {
    let deadline = Instant::now() + ARM_TIMEOUT;
    loop {
        match controller.arm() {
            Ok(()) => return Ok(()),
            Err(StriderError::SensorStale) if Instant::now() < deadline => {
                tokio::time::sleep(ARM_RETRY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn print_arm_status(controller: &ControllerHandle, source: &str) {
    let conditions = controller.conditions();
    let mark = |ok: bool| if ok { "✓".green() } else { "✗".red() };
    println!("  Actuator        {}", controller.actuator_id().bold());
    println!("  Decisions from  {}", source.bold());
    println!("  Safety conditions:");
    println!("    {} emergency stop clear", mark(conditions.emergency_stop_clear));
    println!("    {} battery", mark(conditions.battery_ok));
    println!("    {} temperature", mark(conditions.temperature_ok));
    println!("    {} orientation", mark(conditions.orientation_ok));
    println!("    {} sensors fresh", mark(conditions.sensors_fresh));
    println!();
    println!("  Press {} to stop.\n", "Ctrl-C".bold().yellow());
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _____ __       _     __         "#.bold().cyan());
    println!("{}", r#"  / ___// /______(_)___/ /__  _____"#.bold().cyan());
    println!("{}", r#"  \__ \/ __/ ___/ / __  / _ \/ ___/"#.bold().cyan());
    println!("{}", r#" ___/ / /_/ /  / / /_/ /  __/ /    "#.bold().cyan());
    println!("{}", r#"/____/\__/_/  /_/\__,_/\___/_/     "#.bold().cyan());
    println!();
    println!("  {} {}",
        "Strider".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Safety-Gated Locomotion Controller");
    println!();
}
