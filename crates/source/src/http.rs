use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, RANGE};
use tracing::debug;

use crate::error::SourceError;
use crate::source::{ChunkSource, FileProperties};

/// A chunk source backed by an HTTP object server that honours `Range`.
///
/// Content is addressed as `{base_url}/{locator}`. Properties come from a
/// `HEAD` request; chunks from a ranged `GET`.
pub struct HttpChunkSource {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpChunkSource {
    /// Create a source for the server at `base_url`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Protocol(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self {
            name: name.into(),
            base_url,
            client,
        })
    }

    fn url(&self, locator: &str) -> String {
        format!("{}/{}", self.base_url, locator.trim_start_matches('/'))
    }

    fn transport_error(&self, err: &reqwest::Error) -> SourceError {
        SourceError::Unavailable(format!("{}: {err}", self.name))
    }

    fn status_error(&self, status: StatusCode, locator: &str) -> SourceError {
        if status == StatusCode::NOT_FOUND {
            SourceError::NotFound(locator.to_owned())
        } else if status.is_server_error() {
            SourceError::Unavailable(format!("{} answered {status}", self.name))
        } else {
            SourceError::Protocol(format!("{} answered {status}", self.name))
        }
    }

    /// Read `len` body bytes starting `skip` bytes in. Bytes before the window
    /// are discarded as they arrive, and the body is dropped unread once the
    /// window is full, so at most one chunk is held in memory.
    async fn read_window(
        &self,
        mut response: reqwest::Response,
        skip: u64,
        len: u64,
    ) -> Result<Bytes, SourceError> {
        let mut to_skip = skip;
        let mut out = BytesMut::with_capacity(usize::try_from(len).unwrap_or(usize::MAX));

        while (out.len() as u64) < len {
            let Some(mut piece) = response
                .chunk()
                .await
                .map_err(|e| self.transport_error(&e))?
            else {
                break;
            };
            if to_skip > 0 {
                let skipped = usize::try_from(to_skip).unwrap_or(usize::MAX).min(piece.len());
                piece = piece.slice(skipped..);
                to_skip -= skipped as u64;
            }
            let room = usize::try_from(len - out.len() as u64).unwrap_or(usize::MAX);
            out.extend_from_slice(&piece[..piece.len().min(room)]);
        }

        Ok(out.freeze())
    }
}

impl std::fmt::Debug for HttpChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChunkSource")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &reqwest::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Extract `filename` from a `Content-Disposition` value.
fn disposition_filename(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let (key, raw) = part.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = raw.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_owned())
    })
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn properties(&self, locator: &str) -> Result<FileProperties, SourceError> {
        let response = self
            .client
            .head(self.url(locator))
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status, locator));
        }

        let headers = response.headers();
        let size_bytes = header_str(headers, &CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                SourceError::Protocol(format!("{} sent no usable Content-Length", self.name))
            })?;
        let mime_type = header_str(headers, &CONTENT_TYPE).map(str::to_owned);
        let name = header_str(headers, &CONTENT_DISPOSITION).and_then(disposition_filename);

        debug!(backend = %self.name, locator, size_bytes, "fetched properties");
        Ok(FileProperties {
            size_bytes,
            mime_type,
            name,
        })
    }

    async fn fetch_chunk(
        &self,
        locator: &str,
        offset: u64,
        size: u64,
    ) -> Result<Bytes, SourceError> {
        if size == 0 {
            return Ok(Bytes::new());
        }
        let last = offset.saturating_add(size - 1);
        let response = self
            .client
            .get(self.url(locator))
            .header(RANGE, format!("bytes={offset}-{last}"))
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }
        if !status.is_success() {
            return Err(self.status_error(status, locator));
        }

        // A 200 means the server ignored the range and sends the whole object.
        let skip = if status == StatusCode::PARTIAL_CONTENT {
            0
        } else {
            offset
        };
        let chunk = self.read_window(response, skip, size).await?;

        debug!(backend = %self.name, locator, offset, len = chunk.len(), "fetched chunk");
        Ok(chunk)
    }
}
