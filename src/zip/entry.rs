//! Archive entry descriptors built from a source listing.
//!
//! Nothing here touches file content. The same `Vec<ArchiveEntry>` drives
//! both the size pass and the real pass, which is what keeps their layouts
//! byte-identical.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::{ArchiveError, Result};

use super::structures::{CompressionMethod, DosDateTime};

/// One file reported by a source listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Slash-separated path relative to the listed location.
    pub path: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, size: u64, mod_time: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            mod_time,
        }
    }
}

/// A file as the encoder sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub compression: CompressionMethod,
    /// Uncompressed size taken from the listing. Authoritative for layout.
    pub declared_size: u64,
    pub modified: DosDateTime,
}

impl ArchiveEntry {
    pub fn name_bytes(&self) -> &[u8] {
        self.name.as_bytes()
    }
}

/// Turn a listing into encoder entries, preserving order.
///
/// Fails on the first empty, duplicated or unsafe path.
pub fn build_entries(records: &[FileRecord], compress: bool) -> Result<Vec<ArchiveEntry>> {
    let compression = if compress {
        CompressionMethod::Deflate
    } else {
        CompressionMethod::Stored
    };

    let mut seen = HashSet::with_capacity(records.len());
    let mut entries = Vec::with_capacity(records.len());

    for record in records {
        validate_name(&record.path)?;
        if !seen.insert(record.path.as_str()) {
            return Err(ArchiveError::invalid_entry(&record.path, "duplicate path"));
        }

        entries.push(ArchiveEntry {
            name: record.path.clone(),
            compression,
            declared_size: record.size,
            modified: DosDateTime::from_utc(record.mod_time),
        });
    }

    Ok(entries)
}

fn validate_name(path: &str) -> Result<()> {
    let reason = if path.is_empty() {
        "empty path"
    } else if path.len() > u16::MAX as usize {
        "name longer than 65535 bytes"
    } else if path.starts_with('/') {
        "absolute path"
    } else if path.contains('\\') {
        "backslash in path"
    } else if path.ends_with('/') {
        "directory path"
    } else if path.split('/').any(|segment| segment == "..") {
        "parent directory segment"
    } else {
        return Ok(());
    };

    Err(ArchiveError::invalid_entry(path, reason))
}
