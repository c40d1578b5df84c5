//! battguard - battery charge-threshold daemon following AC dock state.
//!
//! The monitor subcommand watches power-supply uevents and flips the sysfs
//! charge-control thresholds between a docked and a mobile profile, with
//! debouncing so brief plug/unplug events never flap the thresholds. The
//! get/set subcommands are thin wrappers over the threshold files.

mod config;
mod engine;
mod error;
mod logging;
mod mode;
mod power;
mod schedule;
mod threshold;

use clap::{Args, Parser, Subcommand};
use config::{parse_duration, Config};
use engine::{Engine, EngineTiming};
use power::{EventFilter, SysfsPresence};
use schedule::PersistentSchedule;
use std::path::PathBuf;
use std::time::Duration;
use threshold::{ApplyThresholds, SysfsThresholds, Threshold, ThresholdPaths};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "battguard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Battery charge-threshold daemon that follows AC dock state"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the currently applied charge thresholds")]
    Get {
        #[command(flatten)]
        paths: PathArgs,
    },

    #[command(about = "Write charge thresholds directly, bypassing the daemon")]
    Set {
        start: u8,
        end: u8,
        #[command(flatten)]
        paths: PathArgs,
    },

    #[command(about = "Run the monitor daemon")]
    Monitor(MonitorArgs),
}

#[derive(Args, Debug)]
struct PathArgs {
    #[arg(long, value_name = "FILE", help = "Path to the charge control start file")]
    threshold_start_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Path to the charge control end file")]
    threshold_end_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MonitorArgs {
    #[arg(long, value_name = "FILE", help = "Configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'd',
        long,
        value_parser = parse_duration,
        help = "How long to wait before committing docked mode after AC is plugged"
    )]
    docked_delay: Option<Duration>,

    #[arg(short = 's', long, help = "Charge control start threshold in docked mode")]
    docked_start: Option<u8>,

    #[arg(short = 'e', long, help = "Charge control end threshold in docked mode")]
    docked_end: Option<u8>,

    #[arg(
        short = 'D',
        long,
        value_parser = parse_duration,
        help = "How long to wait before committing mobile mode after AC is unplugged"
    )]
    mobile_delay: Option<Duration>,

    #[arg(short = 'S', long, help = "Charge control start threshold on battery")]
    mobile_start: Option<u8>,

    #[arg(short = 'E', long, help = "Charge control end threshold on battery")]
    mobile_end: Option<u8>,

    #[arg(long, value_name = "DIR", help = "Path to the data folder")]
    data_dir: Option<PathBuf>,

    #[arg(long, help = "Delete the data folder content before starting")]
    data_clean: bool,

    #[arg(long, value_name = "FILE", help = "Path to the AC online file")]
    ac_online_path: Option<PathBuf>,

    #[arg(
        long,
        value_parser = parse_duration,
        help = "Cadence of the clock-drift check"
    )]
    resync_interval: Option<Duration>,

    #[arg(
        long,
        value_parser = parse_duration,
        help = "Elapsed-time divergence that triggers a timer re-arm"
    )]
    drift_threshold: Option<Duration>,

    #[command(flatten)]
    paths: PathArgs,
}

impl MonitorArgs {
    /// File config with CLI flags layered on top.
    fn build_config(&self) -> Result<Config, error::ConfigError> {
        let mut config = Config::load_or_default(self.config.as_deref())?;

        if let Some(d) = self.docked_delay {
            config.docked.delay = d;
        }
        if let Some(v) = self.docked_start {
            config.docked.start = v;
        }
        if let Some(v) = self.docked_end {
            config.docked.end = v;
        }
        if let Some(d) = self.mobile_delay {
            config.mobile.delay = d;
        }
        if let Some(v) = self.mobile_start {
            config.mobile.start = v;
        }
        if let Some(v) = self.mobile_end {
            config.mobile.end = v;
        }
        if let Some(ref dir) = self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(ref path) = self.ac_online_path {
            config.ac_online_path = path.clone();
        }
        if let Some(ref path) = self.paths.threshold_start_path {
            config.threshold_start_path = path.clone();
        }
        if let Some(ref path) = self.paths.threshold_end_path {
            config.threshold_end_path = path.clone();
        }
        if let Some(d) = self.resync_interval {
            config.resync_interval = d;
        }
        if let Some(d) = self.drift_threshold {
            config.drift_threshold = d;
        }

        config.validate()?;
        Ok(config)
    }
}

impl PathArgs {
    fn resolve(&self) -> ThresholdPaths {
        let defaults = ThresholdPaths::default();
        ThresholdPaths {
            start: self
                .threshold_start_path
                .clone()
                .unwrap_or(defaults.start),
            end: self.threshold_end_path.clone().unwrap_or(defaults.end),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Get { paths } => {
            logging::init_cli();
            let threshold = SysfsThresholds::new(paths.resolve()).read()?;
            println!("{}", threshold);
            Ok(())
        }

        Command::Set { start, end, paths } => {
            logging::init_cli();
            if start > end || end > 100 {
                return Err(format!(
                    "invalid thresholds start:{} end:{}, need start <= end <= 100",
                    start, end
                )
                .into());
            }
            SysfsThresholds::new(paths.resolve()).apply(Threshold { start, end })?;
            Ok(())
        }

        Command::Monitor(args) => run_monitor(args).await,
    }
}

async fn run_monitor(args: MonitorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.build_config()?;

    if args.data_clean {
        match std::fs::remove_dir_all(&config.data_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let _log_guard = logging::init_daemon(&config.data_dir)?;

    info!(
        data_dir = %config.data_dir.display(),
        docked_delay = %config::format_duration(config.docked.delay),
        docked = %config.docked.threshold(),
        mobile_delay = %config::format_duration(config.mobile.delay),
        mobile = %config.mobile.threshold(),
        "battguard monitor starting"
    );

    // Refuse to start on hardware without charge-control support.
    let threshold_paths = config.threshold_paths();
    threshold_paths.check_exists()?;

    let schedule = PersistentSchedule::load(config.state_path())?;
    let probe = SysfsPresence::new(&config.ac_online_path);
    let applier = SysfsThresholds::new(threshold_paths);
    let timing = EngineTiming {
        resync_interval: config.resync_interval,
        drift_threshold: config.drift_threshold,
    };

    let subscription = power::subscribe(EventFilter::default())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal(shutdown_tx).await {
            error!("signal handler error: {}", e);
        }
    });

    let engine = Engine::new(
        schedule,
        config.docked,
        config.mobile,
        timing,
        probe,
        applier,
    );

    let result = engine.run(subscription, shutdown_rx).await;
    match &result {
        Ok(()) => info!("battguard monitor stopped"),
        Err(e) => error!("battguard monitor failed: {}", e),
    }
    result.map_err(Into::into)
}

/// Trip the shutdown signal on SIGTERM or SIGINT.
async fn wait_for_signal(shutdown_tx: watch::Sender<bool>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}
