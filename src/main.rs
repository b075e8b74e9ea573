use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use iblocksync::config::{DEFAULT_BLOCK_SIZE, DEFAULT_REMOTE_COMMAND};
use iblocksync::sync::{sync_chain, SessionReport};
use iblocksync::{EndpointSpec, RemoteHost, SyncConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Synchronize a block device into an incremental image chain.
///
/// Each run appends one `<destination>.iimgNNN` increment holding the blocks
/// that changed since the previous run. Both hosts need `iblocksync-remote`
/// on their PATH; `localhost` runs it without ssh.
#[derive(Parser, Debug)]
#[command(name = "iblocksync", version, about, long_about = None)]
struct Cli {
    /// [user@]host holding the source device
    source_host: RemoteHost,

    /// Source device or file
    source_path: PathBuf,

    /// [user@]host holding the image chain
    destination_host: RemoteHost,

    /// Base image of the chain
    destination_path: PathBuf,

    /// Block size in bytes
    #[arg(short = 'b', long, env = "IBLOCKSYNC_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u64,

    /// Comment stored in the new increment
    #[arg(short, long, default_value = "")]
    comment: String,

    /// ssh private key for both hosts
    #[arg(short = 'i', long = "id", value_name = "KEYFILE")]
    identity: Option<PathBuf>,

    /// ssh private key for the source host
    #[arg(long, value_name = "KEYFILE")]
    id_source: Option<PathBuf>,

    /// ssh private key for the destination host
    #[arg(long, value_name = "KEYFILE")]
    id_destination: Option<PathBuf>,

    /// Pause between blocks in milliseconds, reduces system load
    #[arg(short, long, value_name = "MS")]
    pause: Option<u64>,

    /// Run both endpoints under sudo
    #[arg(short, long)]
    sudo: bool,

    /// Run the source endpoint under sudo
    #[arg(long)]
    sudo_source: bool,

    /// Run the destination endpoint under sudo
    #[arg(long)]
    sudo_destination: bool,

    /// Endpoint program started on each host
    #[arg(long, env = "IBLOCKSYNC_REMOTE", default_value = DEFAULT_REMOTE_COMMAND)]
    remote_command: String,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Hide progress
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn into_config(self) -> SyncConfig {
        let source = EndpointSpec {
            host: self.source_host,
            path: self.source_path,
            identity_file: self.id_source.or_else(|| self.identity.clone()),
            sudo: self.sudo_source || self.sudo,
        };
        let destination = EndpointSpec {
            host: self.destination_host,
            path: self.destination_path,
            identity_file: self.id_destination.or(self.identity),
            sudo: self.sudo_destination || self.sudo,
        };

        let mut config = SyncConfig::new(source, destination);
        config.block_size = self.block_size;
        config.comment = self.comment;
        config.pause = self.pause.filter(|&ms| ms > 0).map(Duration::from_millis);
        config.remote_command = self.remote_command;
        config.quiet = self.quiet;
        config
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iblocksync=info")),
        1 => EnvFilter::new("iblocksync=debug"),
        _ => EnvFilter::new("iblocksync=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_summary(config: &SyncConfig, report: &SessionReport) {
    let stats = &report.stats;
    println!(
        "{} {}:{} -> {}:{}",
        "Synced".green().bold(),
        config.source.host,
        config.source.path.display(),
        config.destination.host,
        config.destination.path.display()
    );
    println!(
        "  same: {}, diff: {}, transferred: {} bytes",
        stats.same_blocks.to_string().cyan(),
        stats.diff_blocks.to_string().yellow(),
        stats.bytes_transferred
    );
    println!("  Completed in {} seconds", stats.duration.as_secs());
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config();
    let report = sync_chain(&config).await?;
    print_summary(&config, &report);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
