//! Main entry point for the rzipstream CLI application.
//!
//! Lists a local directory or rclone remote, works out the exact size of the
//! ZIP archive it would make, then streams that archive to a local file, an
//! rclone remote, an HTTP PUT or stdout.

use anyhow::{Result, bail};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use rzipstream::cli::{Cli, Location};
use rzipstream::io::{
    Destination, HttpDestination, LocalDestination, LocalSource, Rclone, Source, StdoutDestination,
};
use rzipstream::pipeline::Pipeline;
use rzipstream::progress::format_size;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let source: Arc<dyn Source> = match cli.source_kind() {
        Location::Local => Arc::new(LocalSource),
        Location::Rclone => Arc::new(Rclone::new(&cli.rclone)),
        Location::Stdout | Location::Http => {
            bail!("cannot archive from {}: source must be a local path or rclone remote", cli.source)
        }
    };

    // Kept typed so the upload volume can be reported afterwards
    let mut http = None;
    let destination: Arc<dyn Destination> = match cli.destination_kind() {
        Location::Stdout => Arc::new(StdoutDestination),
        Location::Local => Arc::new(LocalDestination),
        Location::Rclone => Arc::new(Rclone::new(&cli.rclone)),
        Location::Http => {
            let client = Arc::new(HttpDestination::new()?);
            http = Some(client.clone());
            client
        }
    };

    let result = Pipeline::new(source, destination)
        .run(&cli.source, &cli.destination, &cli.options())
        .await?;

    if let Some(http) = http {
        info!(
            transferred = %format_size(http.transferred_bytes()),
            "upload finished"
        );
    }

    let json = serde_json::to_string(&result)?;
    if cli.writes_to_stdout() {
        // stdout holds the archive
        info!(result = %json, "archive complete");
    } else {
        println!("{json}");
    }

    Ok(())
}

/// Log to stderr. `RUST_LOG` wins over the -v/-q flags.
fn init_tracing(cli: &Cli) {
    let level = cli
        .log_level()
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::OFF);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
