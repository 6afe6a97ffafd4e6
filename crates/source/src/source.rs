use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::SourceError;

/// Metadata a backend reports for stored content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileProperties {
    /// Exact content length in bytes.
    pub size_bytes: u64,
    /// MIME type known to the backend, if any.
    pub mime_type: Option<String>,
    /// File name known to the backend, if any.
    pub name: Option<String>,
}

/// A backend connection that serves stored content in addressable chunks.
///
/// `locator` is whatever the backend needs to address the content. Chunk
/// fetches must be cheap to repeat, and one connection must tolerate several
/// concurrent streaming sessions.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Human-readable backend name used in logs.
    fn name(&self) -> &str;

    /// Look up the size and descriptive metadata of the content.
    async fn properties(&self, locator: &str) -> Result<FileProperties, SourceError>;

    /// Fetch up to `size` bytes starting at `offset`.
    ///
    /// Fewer than `size` bytes are returned only when the content ends first.
    async fn fetch_chunk(
        &self,
        locator: &str,
        offset: u64,
        size: u64,
    ) -> Result<Bytes, SourceError>;
}
