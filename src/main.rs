use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Duration};

use speed_tracker_rs::display::DisplayFrame;
use speed_tracker_rs::live_status::LiveStatus;
use speed_tracker_rs::source::{LiveSource, ReplaySource, SimulatedSource};
use speed_tracker_rs::{
    MetricsUpdate, PositionSource, TrackerConfig, TrackerError, TrackingSession, UpdateCause,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceChoice {
    /// Live GPS if present, otherwise replay (with --replay) or demo mode
    Auto,
    Live,
    Simulate,
    Replay,
}

#[derive(Parser, Debug)]
#[command(name = "speed_tracker")]
#[command(about = "Track distance, speed and time from a GPS fix stream", long_about = None)]
struct Args {
    /// Where position samples come from
    #[arg(long, value_enum, default_value = "auto")]
    source: SourceChoice,

    /// Recorded track to replay (.json or .json.gz)
    #[arg(long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// JSON config file; flags below override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Duration in seconds (0 = until quit)
    #[arg(long, value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Display refresh interval in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Single-step distance treated as a GPS jump (meters)
    #[arg(long)]
    jump_threshold: Option<f64>,

    /// Seed for the demo-mode random speeds
    #[arg(long)]
    seed: Option<u64>,

    /// Replay speed multiplier (0 = no pacing)
    #[arg(long)]
    replay_rate: Option<f64>,

    /// Per-update GPS timeout in milliseconds
    #[arg(long)]
    gps_timeout_ms: Option<u64>,

    /// Overwrite this file with a JSON snapshot of the latest metrics
    #[arg(long, value_name = "PATH")]
    status_file: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TrackerConfig::default(),
    };

    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }
    if let Some(threshold) = args.jump_threshold {
        config.jump_threshold_m = threshold;
    }
    if let Some(seed) = args.seed {
        config.simulator.seed = Some(seed);
    }
    if let Some(rate) = args.replay_rate {
        config.replay.rate = rate;
    }
    if let Some(timeout_ms) = args.gps_timeout_ms {
        config.live.timeout_ms = timeout_ms;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_source(args: &Args, config: &TrackerConfig) -> Result<Box<dyn PositionSource>> {
    let replay = |path: &PathBuf| -> Result<Box<dyn PositionSource>> {
        let source = ReplaySource::from_path(path, config.replay.rate)
            .with_context(|| format!("Failed to load track {}", path.display()))?;
        if source.is_empty() {
            anyhow::bail!("Track {} has no samples", path.display());
        }
        println!("  Replay: {} ({} samples)", path.display(), source.len());
        Ok(Box::new(source))
    };

    match args.source {
        SourceChoice::Live => Ok(Box::new(LiveSource::new(config.live.clone()))),
        SourceChoice::Simulate => Ok(Box::new(SimulatedSource::new(config.simulator.clone()))),
        SourceChoice::Replay => {
            let path = args
                .replay
                .as_ref()
                .context("--replay <PATH> is required with --source replay")?;
            replay(path)
        }
        SourceChoice::Auto => {
            let live = LiveSource::new(config.live.clone());
            if live.is_available() {
                Ok(Box::new(live))
            } else if let Some(path) = &args.replay {
                replay(path)
            } else {
                log::warn!(
                    "{} not found, no GPS on this device: enabling demo mode",
                    config.live.command
                );
                Ok(Box::new(SimulatedSource::new(config.simulator.clone())))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    println!("[{}] Speed Tracker Starting", ts_now());
    println!("  Source: {:?}", args.source);
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Jump threshold: {:.1} m", config.jump_threshold_m);
    println!("  Commands: start | stop | reset | quit");

    let source = build_source(&args, &config)?;
    let mut session = TrackingSession::new(&config, Some(source));
    let mut dashboard = Dashboard::new(std::io::stdout(), args.status_file.clone());

    let update = session.start().context("Failed to start tracking")?;
    dashboard.show(&update);

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let deadline = sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                log::info!("Interrupted, stopping...");
                break;
            }
            _ = &mut deadline, if args.duration > 0 => {
                println!();
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            line = commands.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !run_command(line.trim(), &mut session, &mut dashboard) {
                            break;
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        log::warn!("stdin closed: {}", e);
                        stdin_open = false;
                    }
                }
            }
            Some(update) = session.next_update() => {
                dashboard.show(&update);
            }
        }
    }

    if session.is_running() {
        let update = session.stop()?;
        dashboard.show(&update);
    }

    let frame = DisplayFrame::from_metrics(&session.metrics());
    let metrics = session.metrics();
    println!("\n=== Final Stats ===");
    println!("Distance: {} {}", frame.distance, frame.distance_unit);
    println!("Time: {}", frame.time);
    println!("Average speed: {}", frame.average_speed);
    println!("Max speed: {}", frame.max_speed);
    println!("Fixes: {} ({} jumps rejected)", metrics.speed_sample_count, metrics.rejected_jumps);
    if let Some(kind) = session.last_error() {
        return Err(TrackerError::from(kind)).context("Tracking ended early");
    }

    Ok(())
}

/// Apply one stdin command. Returns false to quit.
fn run_command<W: Write>(
    command: &str,
    session: &mut TrackingSession,
    dashboard: &mut Dashboard<W>,
) -> bool {
    let result = match command {
        "" => return true,
        "quit" | "q" | "exit" => return false,
        "start" => session.start(),
        "stop" => session.stop(),
        "reset" => Ok(session.reset()),
        other => {
            eprintln!("Unknown command {:?} (start | stop | reset | quit)", other);
            return true;
        }
    };

    match result {
        Ok(update) => dashboard.show(&update),
        Err(e) => eprintln!("{}", e),
    }
    true
}

/// Terminal status line plus the optional JSON snapshot file
struct Dashboard<W: Write> {
    out: W,
    status_file: Option<PathBuf>,
    last_saved_second: Option<i64>,
    write_failed: bool,
}

impl<W: Write> Dashboard<W> {
    fn new(out: W, status_file: Option<PathBuf>) -> Self {
        Self {
            out,
            status_file,
            last_saved_second: None,
            write_failed: false,
        }
    }

    fn show(&mut self, update: &MetricsUpdate) {
        let line = DisplayFrame::from_update(update).render_line();
        if let Err(e) = self.draw(&line, update.cause) {
            // Warn once; a closed terminal would otherwise log on every tick
            if !self.write_failed {
                log::warn!("Failed to write status line: {}", e);
                self.write_failed = true;
            }
        }

        self.save(update);
    }

    /// Redraw the status line in place; control updates keep their own line
    fn draw(&mut self, line: &str, cause: UpdateCause) -> std::io::Result<()> {
        if cause == UpdateCause::Tick || cause == UpdateCause::Sample {
            write!(self.out, "\r{}\x1b[K", line)?;
        } else {
            writeln!(self.out, "\r{}\x1b[K", line)?;
        }
        self.out.flush()
    }

    fn save(&mut self, update: &MetricsUpdate) {
        let Some(path) = &self.status_file else {
            return;
        };
        // Ticks only refresh the file once per displayed second
        let second = update.metrics.elapsed_ms / 1000;
        if update.cause == UpdateCause::Tick && self.last_saved_second == Some(second) {
            return;
        }
        if let Err(e) = LiveStatus::from_update(update).save(path) {
            log::warn!("Failed to write {}: {}", path.display(), e);
        }
        self.last_saved_second = Some(second);
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
