mod http;
mod local;
mod rclone;
mod stdout;

pub use http::HttpDestination;
pub use local::{LocalDestination, LocalSource};
pub use rclone::Rclone;
pub use stdout::StdoutDestination;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::zip::FileRecord;

/// Sequential, read-once content of one file.
pub type ContentStream = Box<dyn AsyncRead + Send + Unpin>;

/// Archive bytes go here.
pub type ArchiveSink = Box<dyn AsyncWrite + Send + Unpin>;

/// A destination's own progress output, meant for the diagnostic channel.
pub type ProgressStream = Box<dyn AsyncRead + Send + Unpin>;

/// Files found under a location, plus the base their relative paths join onto.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// The listed directory, or the parent of a listed file.
    pub root: String,
    pub files: Vec<FileRecord>,
}

impl Listing {
    /// Location to read `record`'s content from.
    pub fn content_path(&self, record: &FileRecord) -> String {
        join_location(&self.root, &record.path)
    }
}

/// Join a slash-separated relative path onto a local path or remote location.
pub fn join_location(root: &str, relative: &str) -> String {
    if root.is_empty() {
        relative.to_string()
    } else if root.ends_with('/') || root.ends_with(':') {
        format!("{root}{relative}")
    } else {
        format!("{root}/{relative}")
    }
}

/// Storage the archive contents are read from.
#[async_trait]
pub trait Source: Send + Sync {
    /// Recursively list files (never directories) under `location`.
    async fn list(&self, location: &str) -> Result<Listing>;

    /// Open the content of a file previously listed.
    async fn open(&self, path: &str) -> Result<ContentStream>;
}

/// How a destination is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Exact number of bytes that will be written, when known.
    pub size_hint: Option<u64>,
    /// Ask the destination for its own progress stream.
    pub progress: bool,
}

/// Storage the archive is written to.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn open(&self, location: &str, options: OpenOptions) -> Result<DestinationStream>;
}

/// An open destination.
///
/// Bytes go to `writer`. The stream is only complete once [`close`] has
/// returned; dropping it or calling [`abort`] leaves the destination in
/// whatever partial state it reached.
///
/// [`close`]: DestinationStream::close
/// [`abort`]: DestinationStream::abort
pub struct DestinationStream {
    pub writer: ArchiveSink,
    progress: Option<ProgressStream>,
    completion: Option<JoinHandle<Result<()>>>,
    discard: Option<Box<dyn FnOnce() + Send>>,
}

impl DestinationStream {
    pub fn new(writer: ArchiveSink) -> Self {
        Self {
            writer,
            progress: None,
            completion: None,
            discard: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressStream) -> Self {
        self.progress = Some(progress);
        self
    }

    /// A task that resolves once the destination has durably accepted everything.
    pub fn with_completion(mut self, completion: JoinHandle<Result<()>>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Cleanup run by [`abort`](DestinationStream::abort).
    pub fn with_discard(mut self, discard: impl FnOnce() + Send + 'static) -> Self {
        self.discard = Some(Box::new(discard));
        self
    }

    pub fn take_progress(&mut self) -> Option<ProgressStream> {
        self.progress.take()
    }

    /// Flush and close the writer, then wait for the destination to finish.
    ///
    /// On failure the partial output is discarded. An error reported by the
    /// destination itself wins over the local flush error it usually caused.
    pub async fn close(mut self) -> Result<()> {
        let flushed = self.writer.shutdown().await;
        drop(self.writer);

        let completed = match self.completion.take() {
            Some(completion) => completion.await.map_err(anyhow::Error::from).and_then(|done| done),
            None => Ok(()),
        };

        let outcome = match (flushed, completed) {
            (_, Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e.into()),
            (Ok(()), Ok(())) => Ok(()),
        };
        if outcome.is_err() {
            if let Some(discard) = self.discard.take() {
                discard();
            }
            warn!("destination failed to complete, partial output discarded");
        }
        outcome
    }

    /// Give up after the destination rejected a write, returning its own reason.
    ///
    /// The completion task is given [`FAILURE_GRACE`] to report why it stopped
    /// accepting bytes, for instance an HTTP status or an rclone exit code,
    /// then the stream is aborted.
    pub async fn fail(mut self) -> Option<anyhow::Error> {
        let cause = match self.completion.take() {
            Some(mut completion) => {
                match tokio::time::timeout(FAILURE_GRACE, &mut completion).await {
                    Ok(Ok(Ok(()))) => None,
                    Ok(Ok(Err(e))) => Some(e),
                    Ok(Err(e)) => Some(e.into()),
                    Err(_) => {
                        completion.abort();
                        None
                    }
                }
            }
            None => None,
        };
        self.abort();
        cause
    }

    /// Give up on the destination. Nothing written so far is valid output.
    pub fn abort(mut self) {
        if let Some(completion) = self.completion.take() {
            completion.abort();
        }
        drop(self.writer);
        if let Some(discard) = self.discard.take() {
            discard();
        }
        warn!("destination aborted, partial output discarded");
    }
}

/// How long a failed destination may take to explain itself.
pub const FAILURE_GRACE: Duration = Duration::from_secs(5);
