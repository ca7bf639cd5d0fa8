//! In-memory collaborators and readers shared by the unit tests.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::io::{ContentStream, Destination, DestinationStream, Listing, OpenOptions, Source};
use crate::zip::FileRecord;

/// Decode an archive with the `zip` crate, returning (name, content) in central directory order.
pub fn read_archive(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = ::zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        assert_eq!(file.size(), data.len() as u64);
        out.push((file.name().to_string(), data));
    }
    out
}

/// Deterministic content of `len` bytes.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Yields `data` until `fail_at` bytes have been read, then errors.
pub struct FailingReader {
    data: Vec<u8>,
    pos: usize,
    fail_at: usize,
}

impl FailingReader {
    pub fn new(data: Vec<u8>, fail_at: usize) -> Self {
        Self {
            data,
            pos: 0,
            fail_at,
        }
    }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.fail_at {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "source went away",
            )));
        }
        let end = self.fail_at.min(self.data.len()).min(self.pos + buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..end]);
        self.pos = end;
        Poll::Ready(Ok(()))
    }
}

/// Cloneable in-memory writer, optionally failing once `limit` bytes are stored.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    limit: Option<usize>,
}

impl SharedBuffer {
    pub fn failing_after(limit: usize) -> Self {
        Self {
            data: Arc::default(),
            limit: Some(limit),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut data = self.data.lock().unwrap();
        if let Some(limit) = self.limit {
            if data.len() + buf.len() > limit {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "destination closed",
                )));
            }
        }
        data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Files held in memory under a fixed root.
#[derive(Default)]
pub struct MemorySource {
    root: String,
    files: Vec<FileRecord>,
    content: HashMap<String, Vec<u8>>,
    fail_at: HashMap<String, usize>,
    opened: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            ..Default::default()
        }
    }

    /// Add a file whose listed size matches its content.
    pub fn file(self, path: &str, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        self.file_with_size(path, size, data)
    }

    /// Add a file whose listed size may disagree with its content.
    pub fn file_with_size(mut self, path: &str, size: u64, data: Vec<u8>) -> Self {
        self.files
            .push(FileRecord::new(path, size, DateTime::<Utc>::UNIX_EPOCH));
        let key = self.full_path(path);
        self.content.insert(key, data);
        self
    }

    /// Make reads of `path` fail after `after` bytes.
    pub fn failing(mut self, path: &str, after: usize) -> Self {
        let key = self.full_path(path);
        self.fail_at.insert(key, after);
        self
    }

    fn full_path(&self, path: &str) -> String {
        crate::io::join_location(&self.root, path)
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn list(&self, _location: &str) -> Result<Listing> {
        Ok(Listing {
            root: self.root.clone(),
            files: self.files.clone(),
        })
    }

    async fn open(&self, path: &str) -> Result<ContentStream> {
        self.opened.lock().unwrap().push(path.to_string());
        let data = self
            .content
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no such file: {}", path))?;
        match self.fail_at.get(path) {
            Some(after) => Ok(Box::new(FailingReader::new(data, *after))),
            None => Ok(Box::new(Cursor::new(data))),
        }
    }
}

/// Destination that keeps every byte and remembers how it was opened.
#[derive(Default)]
pub struct MemoryDestination {
    pub buffer: SharedBuffer,
    pub(crate) opens: Mutex<Vec<(String, OpenOptions)>>,
    pub progress_output: Option<Vec<u8>>,
    pub reject: bool,
    /// Reason the destination reports from its completion task.
    pub completion_error: Option<&'static str>,
}

impl MemoryDestination {
    pub fn failing_after(limit: usize) -> Self {
        Self {
            buffer: SharedBuffer::failing_after(limit),
            ..Default::default()
        }
    }

    pub fn opens(&self) -> Vec<(String, OpenOptions)> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn open(&self, location: &str, options: OpenOptions) -> Result<DestinationStream> {
        self.opens
            .lock()
            .unwrap()
            .push((location.to_string(), options));
        if self.reject {
            return Err(anyhow!("backend unavailable"));
        }

        let mut stream = DestinationStream::new(Box::new(self.buffer.clone()));
        if let Some(reason) = self.completion_error {
            stream = stream.with_completion(tokio::spawn(async move { Err(anyhow!(reason)) }));
        }
        if let (true, Some(progress)) = (options.progress, self.progress_output.clone()) {
            stream = stream.with_progress(Box::new(Cursor::new(progress)));
        }
        Ok(stream)
    }
}
