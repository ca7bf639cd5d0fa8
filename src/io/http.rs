use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::io::ReaderStream;

use super::{Destination, DestinationStream, OpenOptions};
use crate::progress::ProgressWriter;
use crate::zip::encoder::CHUNK_SIZE;
use anyhow::{Result, bail};

/// HTTP PUT destination for archives
///
/// A size hint is sent as `Content-Length`; without one the body is chunked.
/// The upload runs on its own task, fed through an in-memory pipe of
/// [`CHUNK_SIZE`] bytes, so the encoder is throttled by the network.
pub struct HttpDestination {
    client: Client,
    transferred_bytes: Arc<AtomicU64>,
}

impl HttpDestination {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            transferred_bytes: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Get total bytes handed to the upload pipe
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Destination for HttpDestination {
    async fn open(&self, location: &str, options: OpenOptions) -> Result<DestinationStream> {
        let (writer, reader) = tokio::io::duplex(CHUNK_SIZE);
        let body = Body::wrap_stream(ReaderStream::new(reader));

        let mut request = self.client.put(location).body(body);
        if let Some(size) = options.size_hint {
            request = request.header(CONTENT_LENGTH, size);
        }

        let url = location.to_string();
        let upload = tokio::spawn(async move {
            let resp = request.send().await?;
            if !resp.status().is_success() {
                bail!("HTTP upload to {} failed with status: {}", url, resp.status());
            }
            Ok(())
        });

        let writer = ProgressWriter::new(writer, self.transferred_bytes.clone());
        Ok(DestinationStream::new(Box::new(writer)).with_completion(upload))
    }
}
