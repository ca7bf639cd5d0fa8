//! Error taxonomy for archive construction.
//!
//! None of these are recovered inside the crate. Any of them aborts the
//! in-flight operation, and a partially written destination is never
//! reported as a valid archive.

use std::io;

use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file listing cannot be turned into archive entries.
    #[error("invalid entry {path:?}: {reason}")]
    InvalidEntry { path: String, reason: &'static str },

    /// A content stream failed, or delivered a different byte count than listed.
    #[error("failed to read content of {path:?}")]
    ContentRead {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The source could not open a content stream at all.
    #[error("failed to open content of {path:?}")]
    ContentOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The source listing collaborator failed.
    #[error("failed to list {location:?}")]
    Listing {
        location: String,
        #[source]
        source: io::Error,
    },

    /// The destination could not be opened, rejected a write, or failed to complete.
    #[error("failed to write archive to destination")]
    DestinationWrite(#[source] io::Error),

    /// Encoder misuse. Always a defect in the caller.
    #[error("invalid encoder state: {0}")]
    InvalidState(&'static str),
}

impl ArchiveError {
    pub(crate) fn invalid_entry(path: impl Into<String>, reason: &'static str) -> Self {
        ArchiveError::InvalidEntry {
            path: path.into(),
            reason,
        }
    }

    pub(crate) fn content_read(path: impl Into<String>, source: io::Error) -> Self {
        ArchiveError::ContentRead {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from reading source content, whether at open time or mid-stream.
    pub fn is_content_failure(&self) -> bool {
        matches!(
            self,
            ArchiveError::ContentRead { .. } | ArchiveError::ContentOpen { .. }
        )
    }
}

/// Wrap a collaborator failure so it can sit behind a typed variant.
pub(crate) fn collaborator(err: anyhow::Error) -> io::Error {
    io::Error::other(err)
}
