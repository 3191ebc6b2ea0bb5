use anyhow::{Context, Result};
use chirpd::config::BotConfig;
use chirpd::{supervisor, worker};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "chirpd",
    about = "chirpd — split-process IRC bot (connection supervisor + policy worker)",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the JSON configuration document
    #[arg(long, env = "CHIRPD_CONFIG", default_value = "config.json", global = true)]
    config: PathBuf,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, env = "CHIRPD_LOG", global = true)]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor (default when no subcommand given).
    ///
    /// Connects to every configured IRC network and keeps the worker
    /// process alive, respawning it on exit.
    Serve,
    /// Run the worker process (spawned by the supervisor).
    ///
    /// Reads its config path from the CONFIG environment variable and
    /// speaks the RPC protocol on stdio. Not meant to be run by hand.
    #[command(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();

    match args.command {
        Some(Command::Worker) => {
            // stdout is the RPC channel — logs go to stderr, which the
            // supervisor folds into its own log.
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .with_writer(std::io::stderr)
                .compact()
                .init();
            let config = BotConfig::from_env().context("worker configuration failed")?;
            worker::run(config).await
        }
        None | Some(Command::Serve) => {
            let config = BotConfig::load(&args.config).context("configuration failed")?;
            let _file_guard = setup_logging(&log_level, &config.core.log_file);
            supervisor::run(config).await
        }
    }
}

/// Initialize the tracing subscriber for the supervisor: stdout plus the
/// configured log file. Returns a guard that must stay alive for the
/// process lifetime.
///
/// If the log directory cannot be created, falls back to stdout-only
/// logging with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: &Path,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let dir = log_file.parent().unwrap_or_else(|| Path::new("."));
    let filename = log_file
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("chirpd.log"));

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!(
            "warn: could not create log directory '{}': {e} — falling back to stdout",
            dir.display()
        );
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::never(dir, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    Some(guard)
}
