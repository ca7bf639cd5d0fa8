use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

use crate::pipeline::ArchiveOptions;

#[derive(Parser, Debug)]
#[command(name = "rzipstream")]
#[command(version)]
#[command(about = "Stream a directory into a ZIP archive of precomputed size", long_about = None)]
#[command(after_help = "Examples:\n  \
  rzipstream photos/ photos.zip               archive a local directory\n  \
  rzipstream -n remote:photos                 print the archive size without writing\n  \
  rzipstream -P remote:photos remote:p.zip    upload with `rclone rcat --size`\n  \
  rzipstream -c src/ - | ssh host 'cat > s.zip'   deflate to stdout")]
pub struct Cli {
    /// Directory or file to archive: local path or rclone remote
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Where to write the archive: local path, rclone remote, HTTP URL, or - for stdout
    #[arg(value_name = "DEST", default_value = "-")]
    pub destination: String,

    /// Deflate entries (the archive size is then unknown in advance)
    #[arg(short = 'c', long)]
    pub compress: bool,

    /// Compute the archive size and exit without writing
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Show transfer progress on stderr
    #[arg(short = 'P', long)]
    pub progress: bool,

    /// rclone binary to run for remote locations
    #[arg(long, value_name = "BIN", env = "RCLONE_BIN", default_value = "rclone")]
    pub rclone: PathBuf,

    /// More logging (-vv for debug, -vvv for trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Less logging (-qq => errors hidden too)
    #[arg(short = 'q', action = clap::ArgAction::Count, conflicts_with = "verbose")]
    pub quiet: u8,
}

/// Where a location argument points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Stdout,
    Http,
    Rclone,
    Local,
}

impl Location {
    pub fn classify(location: &str) -> Self {
        if location == "-" {
            Location::Stdout
        } else if location.starts_with("http://") || location.starts_with("https://") {
            Location::Http
        } else if is_rclone_remote(location) {
            Location::Rclone
        } else {
            Location::Local
        }
    }
}

/// `name:path` where `name` looks like an rclone remote, not a drive letter or path.
fn is_rclone_remote(location: &str) -> bool {
    let Some((name, _)) = location.split_once(':') else {
        return false;
    };
    // C:\ and similar
    if name.len() == 1 {
        return false;
    }
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ' | '+' | '@'))
}

impl Cli {
    pub fn options(&self) -> ArchiveOptions {
        ArchiveOptions {
            compress: self.compress,
            dry_run: self.dry_run,
            progress: self.progress,
        }
    }

    /// `None` silences logging entirely.
    pub fn log_level(&self) -> Option<Level> {
        match (self.quiet, self.verbose) {
            (q, _) if q > 1 => None,
            (1, _) => Some(Level::ERROR),
            (_, 0) => Some(Level::WARN),
            (_, 1) => Some(Level::INFO),
            (_, 2) => Some(Level::DEBUG),
            _ => Some(Level::TRACE),
        }
    }

    pub fn source_kind(&self) -> Location {
        Location::classify(&self.source)
    }

    pub fn destination_kind(&self) -> Location {
        Location::classify(&self.destination)
    }

    /// Whether stdout carries the archive and must stay free of anything else.
    pub fn writes_to_stdout(&self) -> bool {
        !self.dry_run && self.destination_kind() == Location::Stdout
    }
}
