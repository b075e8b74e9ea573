//! Rebuild a device image from a chain up to a chosen increment.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use iblocksync::restore::restore_to_path;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Combine the base image and all increments up to IIMG into DESTINATION.
#[derive(Parser, Debug)]
#[command(name = "iblocksync-restore", version, about, long_about = None)]
struct Cli {
    /// Last increment to apply, e.g. `sda.img.iimg004`
    #[arg(value_name = "IIMG")]
    increment: PathBuf,

    /// Output file or block device
    destination: PathBuf,

    /// Overwrite an existing destination file
    #[arg(short, long)]
    force: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

async fn run(cli: Cli) -> Result<()> {
    let stats = restore_to_path(&cli.increment, &cli.destination, cli.force)
        .await
        .with_context(|| format!("restoring {}", cli.increment.display()))?;

    println!(
        "{} {} ({} blocks, {} bytes)",
        "Restored".green().bold(),
        cli.destination.display(),
        stats.blocks,
        stats.bytes
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iblocksync=info")),
        1 => EnvFilter::new("iblocksync=debug"),
        _ => EnvFilter::new("iblocksync=trace"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
