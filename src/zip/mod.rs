//! Streaming ZIP construction.
//!
//! This module turns a file listing into a ZIP stream without ever holding
//! file content in memory, and can tell the exact length of that stream
//! before the first content byte is read.
//!
//! ## Architecture
//!
//! - [`structures`]: ZIP record layouts (local header, data descriptor, central directory, end records)
//! - [`entry`]: Listing records and the encoder entries built from them
//! - [`encoder`]: The streaming encoder state machine
//! - [`size`]: The size pass, an encoder run over declared-only bodies
//!
//! ## ZIP Format Overview
//!
//! A ZIP stream written here consists of:
//! 1. For each file: local file header, body, data descriptor
//! 2. Central Directory with one record per file
//! 3. ZIP64 end record and locator, when the archive needs them
//! 4. End of Central Directory (EOCD) record
//!
//! Every file uses the data-descriptor form, so nothing already written ever
//! has to be revisited. That is what allows output to a non-seekable sink.
//!
//! ## Supported Features
//!
//! - STORED and DEFLATE methods
//! - ZIP64 extensions for files and archives over 4GB or 65535 entries
//! - UTF-8 entry names
//!
//! ## Limitations
//!
//! - No encryption
//! - No directory entries, comments or extra timestamps

pub mod encoder;
pub mod entry;
pub mod size;
pub mod structures;

pub use encoder::{ArchiveState, EntryBody, EntryState, ZipEncoder};
pub use entry::{ArchiveEntry, FileRecord, build_entries};
pub use size::{ArchiveSize, compute_size};
pub use structures::{CompressionMethod, DosDateTime};
