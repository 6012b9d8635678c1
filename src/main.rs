//! DrishtiServo - approach + visual servoing demo
//!
//! Runs the vision subscriber and the approach + visual servoing state
//! against the kinematic host simulation at a fixed control rate.
//!
//! ```bash
//! RUST_LOG=drishti_servo=debug drishti-servo --config config/drishti.toml
//! ```
//!
//! Each control cycle:
//! 1. `VisionSubscriber::tick` applies queued observations
//! 2. the active state runs and updates its solver tasks
//! 3. the simulated robot advances by one period

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use drishti_servo::core::transform::describe;
use drishti_servo::{
    APPROACH_VISUAL_SERVOING, FrameProvider, LogTable, Logger, Result, RunStatus, ServoCommand,
    SimHost, StateRegistry, StaticFrames, TransformConfig, VisionConfig, VisionError, VisionSubscriber,
};

#[derive(Parser, Debug)]
#[command(name = "drishti-servo", version, about = "Marker-based approach + visual servoing demo")]
struct Args {
    /// Scenario configuration file
    #[arg(short, long, default_value = "config/drishti.toml")]
    config: PathBuf,

    /// Override the run time limit (seconds)
    #[arg(long)]
    max_duration: Option<f64>,

    /// Send the enable command after this many seconds
    #[arg(long)]
    enable_after: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AppConfig {
    #[serde(default)]
    control: ControlConfig,
    world: WorldConfig,
    #[serde(default)]
    vision: VisionConfig,
    /// Configuration table of the state named by `control.state`
    servo: toml::Value,
}

#[derive(Debug, Deserialize)]
struct ControlConfig {
    #[serde(default = "default_frequency_hz")]
    frequency_hz: f64,
    #[serde(default = "default_max_duration")]
    max_duration: f64,
    #[serde(default = "default_state")]
    state: String,
    #[serde(default)]
    enable_after: Option<f64>,
    /// Period of the status log line (seconds)
    #[serde(default = "default_status_interval")]
    status_interval: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            frequency_hz: default_frequency_hz(),
            max_duration: default_max_duration(),
            state: default_state(),
            enable_after: None,
            status_interval: default_status_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorldConfig {
    main_robot: String,
    #[serde(default)]
    frames: Vec<FrameEntry>,
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    robot: String,
    frame: String,
    #[serde(default)]
    pose: TransformConfig,
}

fn default_frequency_hz() -> f64 {
    100.0
}
fn default_max_duration() -> f64 {
    60.0
}
fn default_state() -> String {
    APPROACH_VISUAL_SERVOING.to_string()
}
fn default_status_interval() -> f64 {
    1.0
}

impl AppConfig {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VisionError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: AppConfig = toml::from_str(&content)?;
        if !(config.control.frequency_hz.is_finite() && config.control.frequency_hz > 0.0) {
            return Err(VisionError::Config(format!(
                "control.frequency_hz must be positive, got {}",
                config.control.frequency_hz
            )));
        }
        Ok(config)
    }

    fn build_frames(&self) -> StaticFrames {
        let frames = StaticFrames::new(self.world.main_robot.clone());
        for entry in &self.world.frames {
            frames.set(&entry.robot, &entry.frame, entry.pose.to_isometry());
        }
        frames
    }
}

fn main() -> Result<()> {
    let directive = "drishti_servo=info"
        .parse()
        .map_err(|e| VisionError::Config(format!("log directive: {}", e)))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let args = Args::parse();
    info!("DrishtiServo v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from {:?}", args.config);
    let config = AppConfig::load(&args.config)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| VisionError::Config(format!("signal handler: {}", e)))?;

    let dt = 1.0 / config.control.frequency_hz;
    let max_duration = args.max_duration.unwrap_or(config.control.max_duration);
    let mut enable_after = args.enable_after.or(config.control.enable_after);

    let frames = Arc::new(config.build_frames());
    let mut host = SimHost::new(Arc::clone(&frames), dt);
    let provider: Arc<dyn FrameProvider> = frames;
    let subscriber = VisionSubscriber::install(&config.vision, provider, host.shared_datastore())?;
    info!("Vision feed: {}", subscriber.status_label());
    let log_table = Arc::new(LogTable::new());
    subscriber.set_logger(Arc::clone(&log_table) as Arc<dyn Logger>);

    let registry = StateRegistry::with_builtin();
    let mut state = registry.create(&config.control.state, &config.servo)?;
    info!("Starting state {}", state.name());
    if let Err(e) = state.start(&mut host) {
        error!("State {} failed to start: {}", state.name(), e);
        state.teardown(&mut host);
        subscriber.uninstall();
        return Err(e);
    }

    let period = Duration::from_secs_f64(dt);
    let status_every = (config.control.status_interval / dt).round().max(1.0) as u64;
    let mut tick: u64 = 0;
    let mut outcome = None;

    while running.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();
        let elapsed = tick as f64 * dt;
        if elapsed >= max_duration {
            warn!("Time limit of {:.1}s reached", max_duration);
            break;
        }

        if enable_after.is_some_and(|t| elapsed >= t) {
            enable_after = None;
            info!("Sending enable command");
            if let Err(e) = state.handle_command(ServoCommand::Enable, &mut host) {
                warn!("Enable rejected: {}", e);
            }
        }

        subscriber.tick(dt);
        match state.run(&mut host) {
            Ok(RunStatus::Running) => {}
            Ok(RunStatus::Completed(output)) => {
                outcome = Some(output);
                break;
            }
            Err(e) => {
                error!("State {} failed: {}", state.name(), e);
                break;
            }
        }
        host.step();

        if tick % status_every == 0 {
            if let Some(line) = state.status_line() {
                info!("[{:6.2}s] {}", elapsed, line);
            }
            for (name, pose) in log_table.sample() {
                debug!("  {}: {}", name, describe(&pose));
            }
        }
        tick += 1;

        if let Some(remaining) = period.checked_sub(cycle_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    state.teardown(&mut host);
    match outcome {
        Some(output) => info!("State {} completed with output {}", state.name(), output),
        None => warn!("State {} stopped before completion", state.name()),
    }
    subscriber.uninstall();

    info!("DrishtiServo finished");
    Ok(())
}
