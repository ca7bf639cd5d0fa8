use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context as TaskContext, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use super::{ContentStream, Destination, DestinationStream, Listing, OpenOptions, Source};
use crate::zip::FileRecord;

/// Source and destination backed by the `rclone` binary.
///
/// - listing: `rclone lsjson`
/// - content: `rclone cat`
/// - archive upload: `rclone rcat`, with `--size` when the length is known
#[derive(Debug, Clone)]
pub struct Rclone {
    binary: PathBuf,
}

/// One object from `rclone lsjson`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsJsonItem {
    path: String,
    name: String,
    size: i64,
    mod_time: DateTime<FixedOffset>,
    #[serde(default)]
    is_dir: bool,
}

impl LsJsonItem {
    fn into_record(self, path: String) -> Result<FileRecord> {
        if self.size < 0 {
            bail!("{} has an unknown size", self.path);
        }
        Ok(FileRecord::new(
            path,
            self.size as u64,
            self.mod_time.with_timezone(&Utc),
        ))
    }
}

impl Rclone {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);
        command
    }

    /// Run to completion and return stdout, failing on a non-zero exit.
    async fn output(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            bail!(
                "rclone {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Source for Rclone {
    async fn list(&self, location: &str) -> Result<Listing> {
        let stat = self.output(&["lsjson", "--stat", location]).await?;
        let stat: LsJsonItem = serde_json::from_slice(&stat)
            .with_context(|| format!("unexpected lsjson --stat output for {}", location))?;

        // A single file lists itself, relative to its parent
        if !stat.is_dir {
            let root = location
                .strip_suffix(stat.name.as_str())
                .unwrap_or_default()
                .to_string();
            let name = stat.name.clone();
            return Ok(Listing {
                root,
                files: vec![stat.into_record(name)?],
            });
        }

        let raw = self
            .output(&["lsjson", "-R", "--files-only", "--no-mimetype", location])
            .await?;
        let items: Vec<LsJsonItem> = serde_json::from_slice(&raw)
            .with_context(|| format!("unexpected lsjson output for {}", location))?;
        debug!(location, files = items.len(), "listed rclone remote");

        let files = items
            .into_iter()
            .filter(|item| !item.is_dir)
            .map(|item| {
                let path = item.path.clone();
                item.into_record(path)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Listing {
            root: location.to_string(),
            files,
        })
    }

    async fn open(&self, path: &str) -> Result<ContentStream> {
        let mut child = self
            .command(&["cat", path])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to run {}", self.binary.display()))?;
        let stdout = child.stdout.take().context("rclone cat has no stdout")?;

        Ok(Box::new(ChildReader {
            path: path.to_string(),
            child: Some(child),
            exit: None,
            stdout,
        }))
    }
}

#[async_trait]
impl Destination for Rclone {
    async fn open(&self, location: &str, options: OpenOptions) -> Result<DestinationStream> {
        let mut args = vec!["rcat".to_string()];
        if let Some(size) = options.size_hint {
            args.push("--size".to_string());
            args.push(size.to_string());
        }
        if options.progress {
            args.push("--progress".to_string());
        }
        args.push(location.to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let mut child = self
            .command(&args)
            .stdin(Stdio::piped())
            .stdout(if options.progress {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .spawn()
            .with_context(|| format!("failed to run {}", self.binary.display()))?;

        let stdin = child.stdin.take().context("rclone rcat has no stdin")?;
        let progress = child.stdout.take();

        let target = location.to_string();
        let completion = tokio::spawn(async move {
            let status = child.wait().await?;
            if !status.success() {
                bail!("rclone rcat {} exited with {}", target, status);
            }
            Ok(())
        });

        let mut stream = DestinationStream::new(Box::new(stdin)).with_completion(completion);
        if let Some(progress) = progress {
            // rcat reports progress on stdout; it is handed back so the caller
            // can route it to the diagnostic channel
            stream = stream.with_progress(Box::new(progress));
        }
        Ok(stream)
    }
}

/// `rclone cat` output that keeps its process alive, and kills it when dropped.
///
/// End of output is only reported once the process has exited cleanly.
struct ChildReader {
    path: String,
    child: Option<Child>,
    exit: Option<Pin<Box<dyn Future<Output = io::Result<ExitStatus>> + Send>>>,
    stdout: ChildStdout,
}

impl AsyncRead for ChildReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.stdout).poll_read(cx, buf))?;
        if buf.filled().len() > before || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // stdout is exhausted
        if self.exit.is_none() {
            let Some(mut child) = self.child.take() else {
                return Poll::Ready(Ok(()));
            };
            self.exit = Some(Box::pin(async move { child.wait().await }));
        }
        let Some(exit) = self.exit.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let status = ready!(exit.as_mut().poll(cx))?;
        self.exit = None;
        if !status.success() {
            return Poll::Ready(Err(io::Error::other(format!(
                "rclone cat {} exited with {}",
                self.path, status
            ))));
        }
        Poll::Ready(Ok(()))
    }
}
