//! `uplink` command-line entry point.

mod app;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use uplink_transfer::parse_size;

/// Upload files to an HTTP endpoint through a bounded, retrying queue.
#[derive(Parser, Debug)]
#[command(name = "uplink", version, about, long_about = None)]
struct Cli {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Destination URL (overrides the profile)
    #[arg(short, long)]
    url: Option<String>,

    /// Profile to load instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum simultaneous uploads
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Chunk size for chunked uploads, e.g. `8MB`
    #[arg(long, value_parser = parse_size)]
    chunk_size: Option<u64>,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting uplink");

    let profile = config::Profile::load(cli.config.as_deref())?.with_overrides(
        cli.url,
        cli.concurrency,
        cli.chunk_size,
    );
    tracing::debug!(url = %profile.upload.url, concurrency = profile.concurrency, "profile loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(app::run(profile, cli.files))?;

    if summary.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
