//! Progress reporting on the diagnostic channel.
//!
//! Progress text never goes to stdout, which may be carrying the archive.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::zip::ArchiveSize;

/// Diagnostic output for progress text.
pub type DiagnosticWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writer that counts the bytes its inner writer accepts.
pub struct ProgressWriter<W> {
    inner: W,
    written: Arc<AtomicU64>,
}

impl<W> ProgressWriter<W> {
    pub fn new(inner: W, written: Arc<AtomicU64>) -> Self {
        Self { inner, written }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.written.fetch_add(n as u64, Ordering::Relaxed);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// A running progress side channel.
pub enum Progress {
    /// The destination's own progress output, copied through verbatim.
    Forwarded(JoinHandle<()>),
    /// Periodic byte counts taken from a [`ProgressWriter`].
    Counted {
        ticker: JoinHandle<()>,
        written: Arc<AtomicU64>,
        total: ArchiveSize,
        diagnostics: DiagnosticWriter,
    },
}

impl Progress {
    /// Copy a destination's progress stream to `diagnostics` until it ends.
    pub fn forward<R>(mut progress: R, mut diagnostics: DiagnosticWriter) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Progress::Forwarded(tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut progress, &mut diagnostics).await {
                warn!(error = %e, "progress stream failed");
            }
            let _ = diagnostics.flush().await;
        }))
    }

    /// Print `written` every `interval` until finished.
    pub fn count(
        written: Arc<AtomicU64>,
        total: ArchiveSize,
        interval: Duration,
        mut ticker_out: DiagnosticWriter,
        diagnostics: DiagnosticWriter,
    ) -> Self {
        let counter = written.clone();
        let ticker = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                let line = progress_line(counter.load(Ordering::Relaxed), total);
                if ticker_out.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                let _ = ticker_out.flush().await;
            }
        });

        Progress::Counted {
            ticker,
            written,
            total,
            diagnostics,
        }
    }

    /// Stop reporting. Forwarded streams are drained to their end first.
    pub async fn finish(self) {
        match self {
            Progress::Forwarded(pump) => {
                let _ = pump.await;
            }
            Progress::Counted {
                ticker,
                written,
                total,
                mut diagnostics,
            } => {
                ticker.abort();
                let line = progress_line(written.load(Ordering::Relaxed), total);
                let _ = diagnostics.write_all(line.as_bytes()).await;
                let _ = diagnostics.flush().await;
            }
        }
    }

    /// Stop reporting without a final line.
    pub fn cancel(self) {
        match self {
            Progress::Forwarded(pump) => pump.abort(),
            Progress::Counted { ticker, .. } => ticker.abort(),
        }
    }
}

fn progress_line(written: u64, total: ArchiveSize) -> String {
    match total.exact() {
        Some(total) => format!(
            "Transferred: {} / {}\n",
            format_size(written),
            format_size(total)
        ),
        None => format!("Transferred: {}\n", format_size(written)),
    }
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
///
/// # Examples
///
/// ```
/// use rzipstream::progress::format_size;
///
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// assert_eq!(format_size(1048576), "1.00 MB");
/// ```
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SharedBuffer;

    #[tokio::test]
    async fn writer_counts_accepted_bytes() {
        let written = Arc::new(AtomicU64::new(0));
        let mut writer = ProgressWriter::new(Vec::new(), written.clone());
        writer.write_all(b"hello").await.unwrap();
        writer.write_all(&[0u8; 1000]).await.unwrap();
        assert_eq!(written.load(Ordering::Relaxed), 1005);
        assert_eq!(writer.inner.len(), 1005);
    }

    #[tokio::test]
    async fn forwarded_progress_is_copied_verbatim() {
        let out = SharedBuffer::default();
        let progress = Progress::forward(&b"Transferred: 1 / 2\n"[..], Box::new(out.clone()));
        progress.finish().await;
        assert_eq!(out.contents(), b"Transferred: 1 / 2\n");
    }

    #[tokio::test]
    async fn counted_progress_prints_final_line() {
        let out = SharedBuffer::default();
        let written = Arc::new(AtomicU64::new(2048));
        let progress = Progress::count(
            written,
            ArchiveSize::Exact(4096),
            Duration::from_secs(3600),
            Box::new(tokio::io::sink()),
            Box::new(out.clone()),
        );
        progress.finish().await;
        assert_eq!(
            String::from_utf8(out.contents()).unwrap(),
            "Transferred: 2.00 KB / 4.00 KB\n"
        );
    }

    #[test]
    fn indeterminate_total_is_omitted() {
        assert_eq!(
            progress_line(10, ArchiveSize::Indeterminate),
            "Transferred: 10 bytes\n"
        );
    }
}
