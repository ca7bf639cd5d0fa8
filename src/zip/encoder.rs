//! Streaming ZIP encoder.
//!
//! Entries are written strictly in call order. Every entry uses the deferred
//! form (general purpose bit 3): the local header carries zeroed CRC and
//! sizes, the body is streamed, and a data descriptor with the real values
//! follows. The central directory is built from those recorded values when
//! [`ZipEncoder::finish`] is called.
//!
//! ## Entry lifecycle
//!
//! `Pending -> HeaderWritten -> BodyStreaming -> Finalized`
//!
//! ## Archive lifecycle
//!
//! `Open -> EntriesWritten -> CentralDirectoryWritten -> Closed`
//!
//! Any error while an entry or the central directory is being written moves
//! the archive to `Failed`, after which every call is rejected.

use std::io::Write;

use crc32fast::Hasher;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{ArchiveError, Result};

use super::entry::ArchiveEntry;
use super::structures::*;

/// Read size for content streams.
pub const CHUNK_SIZE: usize = 64 * 1024;

const ENTRY_FLAGS: u16 = FLAG_DATA_DESCRIPTOR | FLAG_UTF8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Open,
    EntriesWritten,
    CentralDirectoryWritten,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    HeaderWritten,
    BodyStreaming,
    Finalized,
}

/// Where an entry's body comes from.
pub enum EntryBody<R> {
    /// Account for `declared_size` body bytes without reading or writing any.
    ///
    /// Used by the size pass. A deflated entry makes the archive size
    /// indeterminate since its compressed length cannot be known.
    Declared,
    /// Stream the body from a reader, verifying its length against the declared size.
    Stream(R),
}

/// Values recorded for the central directory once an entry is finalized.
struct CentralRecord {
    name: String,
    compression: CompressionMethod,
    modified: DosDateTime,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
    zip64: bool,
}

impl CentralRecord {
    fn header(&self) -> CentralDirectoryHeader<'_> {
        CentralDirectoryHeader {
            version_needed: version_needed(self.zip64),
            flags: ENTRY_FLAGS,
            compression_method: self.compression,
            modified: self.modified,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            file_name: self.name.as_bytes(),
            lfh_offset: self.lfh_offset,
            zip64: self.zip64,
        }
    }
}

struct BodyTotals {
    crc32: u32,
    compressed: u64,
    uncompressed: u64,
}

fn version_needed(zip64: bool) -> u16 {
    if zip64 {
        VERSION_NEEDED_ZIP64
    } else {
        VERSION_NEEDED_DEFAULT
    }
}

/// ZIP stream writer over any [`AsyncWrite`].
///
/// The encoder owns the running offset. It only advances as bytes are
/// handed to the output, or, for [`EntryBody::Declared`], by the declared
/// body length.
pub struct ZipEncoder<W> {
    output: W,
    state: ArchiveState,
    entry_state: EntryState,
    offset: u64,
    size_exact: bool,
    central: Vec<CentralRecord>,
}

impl<W: AsyncWrite + Unpin> ZipEncoder<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            state: ArchiveState::Open,
            entry_state: EntryState::Pending,
            offset: 0,
            size_exact: true,
            central: Vec::new(),
        }
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    /// State of the most recently added entry.
    pub fn entry_state(&self) -> EntryState {
        self.entry_state
    }

    /// Archive bytes accounted for so far.
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// False once a declared-only deflated entry has been added.
    pub fn is_size_exact(&self) -> bool {
        self.size_exact
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    /// Write one complete entry: local header, body, data descriptor.
    pub async fn add_entry<R>(&mut self, entry: &ArchiveEntry, body: EntryBody<R>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        match self.state {
            ArchiveState::Open | ArchiveState::EntriesWritten => {}
            ArchiveState::Failed => {
                return Err(ArchiveError::InvalidState("encoder failed earlier"));
            }
            _ => return Err(ArchiveError::InvalidState("entry added after finish")),
        }

        match self.write_entry(entry, body).await {
            Ok(()) => {
                self.state = ArchiveState::EntriesWritten;
                Ok(())
            }
            Err(e) => {
                self.state = ArchiveState::Failed;
                Err(e)
            }
        }
    }

    /// Write the central directory and end records, returning the total archive length.
    pub async fn finish(&mut self) -> Result<u64> {
        match self.state {
            ArchiveState::Open | ArchiveState::EntriesWritten => {}
            ArchiveState::Failed => {
                return Err(ArchiveError::InvalidState("encoder failed earlier"));
            }
            _ => return Err(ArchiveError::InvalidState("finish called twice")),
        }

        match self.write_trailer().await {
            Ok(()) => {
                self.state = ArchiveState::Closed;
                Ok(self.offset)
            }
            Err(e) => {
                self.state = ArchiveState::Failed;
                Err(e)
            }
        }
    }

    async fn write_entry<R>(&mut self, entry: &ArchiveEntry, body: EntryBody<R>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.entry_state = EntryState::Pending;
        let lfh_offset = self.offset;
        let declared_zip64 = needs_zip64(entry.declared_size) || needs_zip64(lfh_offset);

        let header = LocalFileHeader {
            version_needed: version_needed(declared_zip64),
            flags: ENTRY_FLAGS,
            compression_method: entry.compression,
            modified: entry.modified,
            file_name: entry.name_bytes(),
        };
        self.write(&header.to_bytes().map_err(ArchiveError::DestinationWrite)?)
            .await?;
        self.entry_state = EntryState::HeaderWritten;

        let totals = match body {
            EntryBody::Declared => {
                if entry.compression != CompressionMethod::Stored {
                    self.size_exact = false;
                }
                self.offset += entry.declared_size;
                BodyTotals {
                    crc32: 0,
                    compressed: entry.declared_size,
                    uncompressed: entry.declared_size,
                }
            }
            EntryBody::Stream(reader) => self.stream_body(entry, reader).await?,
        };

        let zip64 = declared_zip64
            || needs_zip64(totals.compressed)
            || needs_zip64(totals.uncompressed);
        let descriptor = DataDescriptor {
            crc32: totals.crc32,
            compressed_size: totals.compressed,
            uncompressed_size: totals.uncompressed,
            zip64,
        };
        self.write(&descriptor.to_bytes().map_err(ArchiveError::DestinationWrite)?)
            .await?;

        self.central.push(CentralRecord {
            name: entry.name.clone(),
            compression: entry.compression,
            modified: entry.modified,
            crc32: totals.crc32,
            compressed_size: totals.compressed,
            uncompressed_size: totals.uncompressed,
            lfh_offset,
            zip64,
        });
        self.entry_state = EntryState::Finalized;

        debug!(
            name = %entry.name,
            offset = lfh_offset,
            size = totals.uncompressed,
            compressed = totals.compressed,
            "entry written"
        );
        Ok(())
    }

    async fn stream_body<R>(&mut self, entry: &ArchiveEntry, mut reader: R) -> Result<BodyTotals>
    where
        R: AsyncRead + Unpin,
    {
        self.entry_state = EntryState::BodyStreaming;

        let mut hasher = Hasher::new();
        let mut deflater = match entry.compression {
            CompressionMethod::Deflate => Some(DeflateEncoder::new(Vec::new(), Compression::default())),
            CompressionMethod::Stored => None,
        };
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut uncompressed = 0u64;
        let mut compressed = 0u64;

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| ArchiveError::content_read(&entry.name, e))?;
            if n == 0 {
                break;
            }

            uncompressed += n as u64;
            if uncompressed > entry.declared_size {
                return Err(length_mismatch(entry, uncompressed));
            }

            let chunk = &buf[..n];
            hasher.update(chunk);

            match deflater.as_mut() {
                Some(encoder) => {
                    encoder
                        .write_all(chunk)
                        .map_err(ArchiveError::DestinationWrite)?;
                    if !encoder.get_ref().is_empty() {
                        self.write(encoder.get_ref()).await?;
                        compressed += encoder.get_ref().len() as u64;
                        encoder.get_mut().clear();
                    }
                }
                None => {
                    self.write(chunk).await?;
                    compressed += n as u64;
                }
            }
            trace!(name = %entry.name, read = uncompressed, "chunk");
        }

        if uncompressed != entry.declared_size {
            return Err(length_mismatch(entry, uncompressed));
        }

        if let Some(encoder) = deflater {
            let tail = encoder.finish().map_err(ArchiveError::DestinationWrite)?;
            self.write(&tail).await?;
            compressed += tail.len() as u64;
        }

        Ok(BodyTotals {
            crc32: hasher.finalize(),
            compressed,
            uncompressed,
        })
    }

    async fn write_trailer(&mut self) -> Result<()> {
        let cd_offset = self.offset;
        for i in 0..self.central.len() {
            let bytes = self.central[i]
                .header()
                .to_bytes()
                .map_err(ArchiveError::DestinationWrite)?;
            self.write(&bytes).await?;
        }
        let cd_size = self.offset - cd_offset;
        self.state = ArchiveState::CentralDirectoryWritten;

        let eocd = EndOfCentralDirectory {
            total_entries: self.central.len() as u64,
            cd_size,
            cd_offset,
        };
        self.write(&eocd.to_bytes().map_err(ArchiveError::DestinationWrite)?)
            .await?;
        self.output
            .flush()
            .await
            .map_err(ArchiveError::DestinationWrite)?;

        debug!(
            entries = self.central.len(),
            cd_offset,
            cd_size,
            total = self.offset,
            "archive finished"
        );
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.output
            .write_all(bytes)
            .await
            .map_err(ArchiveError::DestinationWrite)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

fn length_mismatch(entry: &ArchiveEntry, actual: u64) -> ArchiveError {
    let err = std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!(
            "listing declared {} bytes but content delivered {}",
            entry.declared_size,
            if actual > entry.declared_size {
                format!("more than {}", entry.declared_size)
            } else {
                actual.to_string()
            }
        ),
    );
    ArchiveError::content_read(&entry.name, err)
}
