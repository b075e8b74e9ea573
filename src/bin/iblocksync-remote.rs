//! Endpoint program started by `iblocksync` on the source and destination
//! hosts. Speaks the session protocol on stdin/stdout; logs go to stderr.

use clap::{Parser, ValueEnum};
use iblocksync::server::run_endpoint;
use iblocksync::transport::EndpointRole;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Stream a source device
    Source,
    /// Append an increment to a chain
    Writer,
}

impl From<Mode> for EndpointRole {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Source => EndpointRole::Source,
            Mode::Writer => EndpointRole::Writer,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "iblocksync-remote", version, about = "iblocksync session endpoint")]
struct Cli {
    #[arg(value_enum)]
    mode: Mode,

    /// Source device, or base image of the chain
    path: PathBuf,

    /// Verbose output on stderr
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iblocksync=warn")),
        1 => EnvFilter::new("iblocksync=debug"),
        _ => EnvFilter::new("iblocksync=trace"),
    };
    // stdout carries the protocol
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run_endpoint(cli.mode.into(), &cli.path).await {
        eprintln!("iblocksync-remote {}: {}", EndpointRole::from(cli.mode).as_arg(), e);
        std::process::exit(1);
    }
}
