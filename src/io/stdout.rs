use super::{Destination, DestinationStream, OpenOptions};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Standard output destination
///
/// There is nothing to preallocate and no progress channel, so both open
/// options are ignored. Nothing else may write to stdout while it is open.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutDestination;

#[async_trait]
impl Destination for StdoutDestination {
    async fn open(&self, _location: &str, options: OpenOptions) -> Result<DestinationStream> {
        debug!(size_hint = ?options.size_hint, "writing archive to stdout");
        Ok(DestinationStream::new(Box::new(tokio::io::stdout())))
    }
}
