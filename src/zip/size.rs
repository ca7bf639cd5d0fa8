//! Archive size precomputation.
//!
//! Runs a throwaway [`ZipEncoder`] over the entry list with declared-only
//! bodies into a sink. No content is read, so it finishes in time linear in
//! the number of entries regardless of file sizes.

use std::fmt;

use serde::{Serialize, Serializer};
use tokio::io::{Empty, sink};
use tracing::info;

use crate::error::Result;

use super::encoder::{EntryBody, ZipEncoder};
use super::entry::ArchiveEntry;

/// Final archive length, known or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSize {
    Exact(u64),
    /// Compression was requested, so the length depends on the content.
    Indeterminate,
}

impl ArchiveSize {
    pub fn exact(&self) -> Option<u64> {
        match self {
            ArchiveSize::Exact(size) => Some(*size),
            ArchiveSize::Indeterminate => None,
        }
    }

    /// Signed form used in JSON output, `-1` when indeterminate.
    pub fn as_i64(&self) -> i64 {
        match self {
            ArchiveSize::Exact(size) => *size as i64,
            ArchiveSize::Indeterminate => -1,
        }
    }
}

impl fmt::Display for ArchiveSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveSize::Exact(size) => write!(f, "{} bytes", size),
            ArchiveSize::Indeterminate => f.write_str("unknown"),
        }
    }
}

impl Serialize for ArchiveSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

/// Compute the exact length the real pass will produce for `entries`.
///
/// Returns [`ArchiveSize::Indeterminate`] when any entry is deflated.
pub async fn compute_size(entries: &[ArchiveEntry]) -> Result<ArchiveSize> {
    let mut encoder = ZipEncoder::new(sink());
    for entry in entries {
        encoder
            .add_entry(entry, EntryBody::<Empty>::Declared)
            .await?;
    }
    let total = encoder.finish().await?;

    let size = if encoder.is_size_exact() {
        ArchiveSize::Exact(total)
    } else {
        ArchiveSize::Indeterminate
    };
    info!(entries = entries.len(), %size, "computed archive size");
    Ok(size)
}
