use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "pairwatch")]
#[command(version, about = "Watch connector logs for device pairing")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.pairwatch/monitor.toml` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor a pairing attempt and print setup events as JSON lines
    Watch {
        /// Identifier forwarded into every event
        #[arg(long)]
        server_id: String,

        /// Provider whose monitor should run
        #[arg(long, default_value = "whatsapp")]
        provider: String,

        #[command(flatten)]
        target: WatchTarget,

        /// Ignore log lines before this RFC 3339 instant (default: one lookback before now)
        #[arg(long, value_parser = parse_instant)]
        since: Option<DateTime<Utc>>,
    },
    /// Print the most recent QR code found in a log file
    Scan {
        file: PathBuf,

        /// Ignore log lines before this RFC 3339 instant
        #[arg(long, value_parser = parse_instant)]
        since: Option<DateTime<Utc>>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct WatchTarget {
    /// Docker container whose logs to follow
    #[arg(long)]
    pub container: Option<String>,

    /// Local log file to follow
    #[arg(long)]
    pub file: Option<PathBuf>,
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    pairwatch::logs::parse_timestamp(raw)
        .ok_or_else(|| format!("'{raw}' is not an RFC 3339 timestamp"))
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Watch {
            server_id,
            provider,
            target,
            since,
        } => {
            cmd::cmd_watch(&project_dir, server_id, provider, target, *since).await?;
        }
        Commands::Scan { file, since } => cmd::cmd_scan(file, *since)?,
    }

    Ok(())
}
