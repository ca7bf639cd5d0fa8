//! # rzipstream
//!
//! Stream a set of files into a ZIP archive whose exact length is known
//! before the first byte of content is read.
//!
//! Knowing the length up front lets the archive go straight to destinations
//! that need it declared in advance, such as an HTTP PUT with
//! `Content-Length` or `rclone rcat --size`, without staging it anywhere.
//!
//! ## Features
//!
//! - Exact archive size from the listing alone, for STORED archives
//! - Constant memory: content flows through in 64 KiB chunks
//! - ZIP64 for large files, large archives and many entries
//! - Optional DEFLATE, at the cost of an indeterminate size
//! - Local, rclone, HTTP and stdout backends
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rzipstream::io::{LocalDestination, LocalSource};
//! use rzipstream::pipeline::{ArchiveOptions, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(Arc::new(LocalSource), Arc::new(LocalDestination));
//!
//!     let result = pipeline
//!         .run("photos", "photos.zip", &ArchiveOptions::default())
//!         .await?;
//!     println!("wrote {} ({})", result.name, result.size);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod progress;
pub mod zip;

#[cfg(test)]
mod testing;

pub use crate::cli::Cli;
pub use crate::error::{ArchiveError, Result};
pub use crate::pipeline::{ArchiveOptions, ArchiveResult, Pipeline};
pub use crate::zip::{ArchiveSize, FileRecord, ZipEncoder, build_entries, compute_size};
