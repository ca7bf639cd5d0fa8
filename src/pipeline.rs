//! Archive pipeline: source listing, size pass, destination, real pass.
//!
//! Two independent encoders share one entry list. The first runs over
//! declared-only bodies into a sink to learn the archive size; the second
//! streams real content into the destination. The size handed to the
//! destination and returned to the caller always comes from the first.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tracing::{debug, info};

use crate::error::{ArchiveError, Result, collaborator};
use crate::io::{Destination, DestinationStream, Listing, OpenOptions, Source};
use crate::progress::{DiagnosticWriter, Progress, ProgressWriter};
use crate::zip::{ArchiveEntry, ArchiveSize, EntryBody, ZipEncoder, build_entries, compute_size};

/// What to do with a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Deflate every entry. The archive size becomes indeterminate.
    pub compress: bool,
    /// Stop after the size pass without touching the destination.
    pub dry_run: bool,
    /// Report bytes transferred on the diagnostic channel.
    pub progress: bool,
}

/// The archive a run produced, or would produce for a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveResult {
    pub path: String,
    pub name: String,
    pub size: ArchiveSize,
}

type DiagnosticFactory = Arc<dyn Fn() -> DiagnosticWriter + Send + Sync>;

pub struct Pipeline {
    source: Arc<dyn Source>,
    destination: Arc<dyn Destination>,
    diagnostics: DiagnosticFactory,
    progress_interval: Duration,
}

impl Pipeline {
    pub fn new(source: Arc<dyn Source>, destination: Arc<dyn Destination>) -> Self {
        Self {
            source,
            destination,
            diagnostics: Arc::new(|| Box::new(tokio::io::stderr())),
            progress_interval: Duration::from_secs(1),
        }
    }

    /// Where progress text goes. Defaults to stderr.
    pub fn with_diagnostics(
        mut self,
        factory: impl Fn() -> DiagnosticWriter + Send + Sync + 'static,
    ) -> Self {
        self.diagnostics = Arc::new(factory);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Archive everything under `source_location` into `destination_location`.
    ///
    /// Fails without writing anything if the listing is invalid. Any failure
    /// after the destination is opened aborts it; no partial archive is ever
    /// reported as a result.
    pub async fn run(
        &self,
        source_location: &str,
        destination_location: &str,
        options: &ArchiveOptions,
    ) -> Result<ArchiveResult> {
        let listing = self
            .source
            .list(source_location)
            .await
            .map_err(|e| ArchiveError::Listing {
                location: source_location.to_string(),
                source: collaborator(e),
            })?;
        info!(
            source = source_location,
            files = listing.files.len(),
            "listed source"
        );

        let entries = build_entries(&listing.files, options.compress)?;
        let size = compute_size(&entries).await?;
        let result = ArchiveResult {
            path: destination_location.to_string(),
            name: basename(destination_location),
            size,
        };

        if options.dry_run {
            info!(%size, "dry run, nothing written");
            return Ok(result);
        }

        let open_options = OpenOptions {
            size_hint: size.exact(),
            progress: options.progress,
        };
        let mut stream = self
            .destination
            .open(destination_location, open_options)
            .await
            .map_err(|e| ArchiveError::DestinationWrite(collaborator(e)))?;
        debug!(destination = destination_location, ?open_options, "destination opened");

        let written = Arc::new(AtomicU64::new(0));
        let progress = options
            .progress
            .then(|| self.start_progress(&mut stream, &written, size));

        let encoded = {
            let output = ProgressWriter::new(&mut stream.writer, written.clone());
            self.encode(&listing, &entries, output).await
        };

        let outcome = match encoded {
            Ok(total) => stream
                .close()
                .await
                .map(|()| total)
                .map_err(|e| ArchiveError::DestinationWrite(collaborator(e))),
            // A rejected write usually means the destination gave up first
            Err(ArchiveError::DestinationWrite(write_err)) => match stream.fail().await {
                Some(cause) => Err(ArchiveError::DestinationWrite(collaborator(cause))),
                None => Err(ArchiveError::DestinationWrite(write_err)),
            },
            Err(e) => {
                stream.abort();
                Err(e)
            }
        };

        match outcome {
            Ok(total) => {
                if let Some(progress) = progress {
                    progress.finish().await;
                }
                info!(destination = destination_location, bytes = total, "archive written");
                Ok(result)
            }
            Err(e) => {
                if let Some(progress) = progress {
                    progress.cancel();
                }
                Err(e)
            }
        }
    }

    /// Real pass: stream every listed file, in order, through a fresh encoder.
    async fn encode<W>(&self, listing: &Listing, entries: &[ArchiveEntry], output: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut encoder = ZipEncoder::new(output);

        for (record, entry) in listing.files.iter().zip(entries) {
            let path = listing.content_path(record);
            let content = self
                .source
                .open(&path)
                .await
                .map_err(|e| ArchiveError::ContentOpen {
                    path: path.clone(),
                    source: collaborator(e),
                })?;
            encoder.add_entry(entry, EntryBody::Stream(content)).await?;
        }

        encoder.finish().await
    }

    fn start_progress(
        &self,
        stream: &mut DestinationStream,
        written: &Arc<AtomicU64>,
        size: ArchiveSize,
    ) -> Progress {
        match stream.take_progress() {
            Some(native) => Progress::forward(native, (self.diagnostics)()),
            None => Progress::count(
                written.clone(),
                size,
                self.progress_interval,
                (self.diagnostics)(),
                (self.diagnostics)(),
            ),
        }
    }
}

/// Last path segment of a local path or remote location.
fn basename(location: &str) -> String {
    let trimmed = location.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(trimmed)
        .to_string()
}
