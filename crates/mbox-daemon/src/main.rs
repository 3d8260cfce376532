//! Mailbox daemon entry point.
//!
//! Publishes a read-only readback record and a writable settings record,
//! serves external writes on a dedicated service thread and runs the
//! fixed-period control loop that applies scheduled set-points.

mod signals;
mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use mbox_common::config::{ApplyPolicy, MailboxConfig};
use mbox_common::time::Timestamp;
use mbox_core::control::Records;
use mbox_core::service::Service;
use mbox_core::shutdown::Shutdown;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::telemetry::BeamTelemetry;

/// Iterations between periodic status lines.
const STATUS_INTERVAL: u64 = 20;

/// Mailbox daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "mbox-daemon",
    about = "PV mailbox daemon - readback publisher with deferred set-point apply",
    version,
    long_about = None
)]
struct Args {
    /// Record name prefix (records are <PREFIX>:rbk and <PREFIX>:set).
    prefix: Option<String>,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Control loop period, e.g. "500ms" or "2s".
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    delay: Option<Duration>,

    /// Samples per generated waveform.
    #[arg(long, short = 'e')]
    event_count: Option<usize>,

    /// Apply freshly written set-points without waiting for a schedule.
    #[arg(long)]
    immediate: bool,

    /// Maximum cycles to run (0 = infinite).
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting mailbox daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        prefix = %config.prefix,
        period = %humantime::format_duration(config.period),
        event_count = config.event_count,
        policy = ?config.apply_policy,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone()).context("Failed to set up signal handlers")?;

    run_daemon(&config, &shutdown)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("mbox_daemon={level},mbox_core={level},mbox_common={level}");

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
/// 2. `MBOX_CONFIG_PATH` environment variable
/// 3. `/etc/mbox/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<MailboxConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return MailboxConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("MBOX_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from MBOX_CONFIG_PATH");
            return MailboxConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from MBOX_CONFIG_PATH={env_path:?}"));
        }
        warn!(
            path = %env_path,
            "MBOX_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/mbox/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(candidate);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return MailboxConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(MailboxConfig::default())
}

/// Command-line flags win over whatever the config file said.
fn apply_overrides(config: &mut MailboxConfig, args: &Args) {
    if let Some(prefix) = &args.prefix {
        config.prefix.clone_from(prefix);
    }
    if let Some(delay) = args.delay {
        config.period = delay;
    }
    if let Some(event_count) = args.event_count {
        config.event_count = event_count;
    }
    if args.immediate {
        config.apply_policy = ApplyPolicy::Immediate;
    }
    if let Some(max_cycles) = args.max_cycles {
        config.max_cycles = max_cycles;
    }
}

fn run_daemon(config: &MailboxConfig, shutdown: &Shutdown) -> Result<()> {
    let records = Records::open(config, Timestamp::now()).context("Failed to open records")?;

    let service = Service::new();
    records
        .register(&service)
        .context("Failed to publish records")?;
    // External transports clone `service_thread.handle()` to submit writes;
    // this process wires none in and only exposes the records through `service`.
    let service_thread = service
        .spawn(config.service_queue)
        .context("Failed to start service thread")?;
    info!(records = ?service.names(), "Records published");

    let mut control = records
        .control_loop()
        .config(config)
        .telemetry(BeamTelemetry::new(config.event_count))
        .build();

    info!(period = ?control.period(), max_cycles = config.max_cycles, "Entering main loop");
    let mut dumped = false;
    let result = control
        .run_with(shutdown, |iteration, metrics| {
            if !dumped {
                dumped = true;
                match serde_json::to_string_pretty(&iteration.record) {
                    Ok(json) => info!("First readback:\n{json}"),
                    Err(e) => warn!(error = %e, "Failed to render readback"),
                }
            }
            if iteration.count % STATUS_INTERVAL == 0 {
                info!(
                    cycles = iteration.count,
                    applies = metrics.applies(),
                    overruns = metrics.overrun_count(),
                    mean_late_ms = metrics.mean_lateness().map(|d| d.as_millis()),
                    "Periodic status"
                );
            }
        })
        .context("Control loop stopped");

    info!("Shutting down...");
    service_thread.stop();

    let snapshot = control.metrics().snapshot();
    info!(
        iterations = snapshot.iterations,
        batches = snapshot.batches,
        applies = snapshot.applies,
        overruns = snapshot.overrun_count,
        max_iteration_us = snapshot.max_iteration_ns / 1_000,
        mean_late_ms = snapshot.mean_late_ns.map(|ns| ns / 1_000_000),
        "Daemon shutdown complete"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["mbox-daemon"]);
        assert!(args.prefix.is_none());
        assert!(args.config.is_none());
        assert!(!args.immediate);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "mbox-daemon",
            "-d",
            "250ms",
            "-e",
            "64",
            "--immediate",
            "--max-cycles",
            "10",
            "ring",
        ]);
        let mut config = MailboxConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.prefix, "ring");
        assert_eq!(config.period, Duration::from_millis(250));
        assert_eq!(config.event_count, 64);
        assert_eq!(config.apply_policy, ApplyPolicy::Immediate);
        assert_eq!(config.max_cycles, 10);
        assert_eq!(config.readback_name(), "ring:rbk");
    }

    #[test]
    fn test_args_with_config() {
        let args = Args::parse_from(["mbox-daemon", "-c", "test.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("test.toml")));
    }

    #[test]
    fn test_bad_delay_rejected() {
        assert!(Args::try_parse_from(["mbox-daemon", "-d", "soon"]).is_err());
    }

    #[test]
    fn test_bounded_run() {
        let config = MailboxConfig {
            period: Duration::from_millis(1),
            event_count: 4,
            max_cycles: 3,
            ..MailboxConfig::default()
        };
        let shutdown = Shutdown::new();
        run_daemon(&config, &shutdown).unwrap();
        assert!(shutdown.is_triggered());
    }
}
