use super::{ContentStream, Destination, DestinationStream, Listing, OpenOptions, Source};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::zip::FileRecord;

/// Local filesystem source
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSource;

#[async_trait]
impl Source for LocalSource {
    async fn list(&self, location: &str) -> Result<Listing> {
        let path = Path::new(location);
        let metadata = fs::metadata(path)
            .await
            .with_context(|| format!("cannot stat {}", location))?;

        // A single file lists itself, relative to its parent
        if !metadata.is_dir() {
            let name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", location))?;
            let root = path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let record = FileRecord::new(name, metadata.len(), modified(&metadata)?);
            return Ok(Listing {
                root,
                files: vec![record],
            });
        }

        let root = path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk(&root)).await??;
        debug!(location, files = files.len(), "listed local directory");

        Ok(Listing {
            root: location.to_string(),
            files,
        })
    }

    async fn open(&self, path: &str) -> Result<ContentStream> {
        let file = fs::File::open(path)
            .await
            .with_context(|| format!("cannot open {}", path))?;
        Ok(Box::new(file))
    }
}

/// Walk `root` depth-first in file name order, returning files only.
fn walk(root: &Path) -> Result<Vec<FileRecord>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root)?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let metadata = entry.metadata()?;
        files.push(FileRecord::new(path, metadata.len(), modified(&metadata)?));
    }

    Ok(files)
}

fn modified(metadata: &Metadata) -> Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}

/// Local file destination
///
/// A size hint preallocates the file with `set_len`. Writes are purely
/// sequential from offset zero, so the final length is exactly the hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDestination;

#[async_trait]
impl Destination for LocalDestination {
    async fn open(&self, location: &str, options: OpenOptions) -> Result<DestinationStream> {
        let path = PathBuf::from(location);

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = fs::File::create(&path)
            .await
            .with_context(|| format!("cannot create {}", location))?;
        if let Some(size) = options.size_hint {
            file.set_len(size)
                .await
                .with_context(|| format!("cannot preallocate {} bytes for {}", size, location))?;
        }

        Ok(DestinationStream::new(Box::new(file)).with_discard(move || {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove partial archive");
            }
        }))
    }
}
