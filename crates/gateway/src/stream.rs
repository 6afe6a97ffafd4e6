use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, warn};

use chunkgate_source::ChunkSource;

use crate::balancer::SessionSlot;
use crate::error::GatewayError;
use crate::gateway::RequestPhase;
use crate::metrics::GatewayMetrics;
use crate::range::ChunkPlan;

/// Lazily produced response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// An empty body.
pub fn empty_stream() -> ByteStream {
    Box::pin(futures::stream::empty())
}

struct ChunkCursor {
    source: Arc<dyn ChunkSource>,
    locator: String,
    plan: ChunkPlan,
    next: u64,
    yielded: u64,
    slot: Option<SessionSlot>,
    metrics: Arc<GatewayMetrics>,
}

impl ChunkCursor {
    fn finish(&mut self) {
        self.slot = None;
    }

    async fn fetch_next(&mut self) -> Result<Bytes, GatewayError> {
        let i = self.next;
        let offset = self.plan.chunk_offset(i);
        let (start, end) = self.plan.keep(i);
        let chunk = self
            .source
            .fetch_chunk(&self.locator, offset, self.plan.chunk_size)
            .await?;

        let have = chunk.len() as u64;
        if have < end {
            return Err(GatewayError::BackendUnavailable(format!(
                "{} returned {have} bytes at offset {offset}, expected at least {end}",
                self.source.name()
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(chunk.slice(start as usize..end as usize))
    }
}

/// Stream the bytes covered by `plan` from `source`.
///
/// Chunks are fetched one at a time, each only after the previous one was
/// consumed. The stream holds `slot` until it ends or is dropped, so a client
/// disconnect stops fetching and frees the backend. A fetch failure ends the
/// stream with one error item.
pub fn chunk_stream(
    source: Arc<dyn ChunkSource>,
    locator: String,
    plan: ChunkPlan,
    slot: SessionSlot,
    metrics: Arc<GatewayMetrics>,
) -> ByteStream {
    let cursor = ChunkCursor {
        source,
        locator,
        plan,
        next: 0,
        yielded: 0,
        slot: Some(slot),
        metrics,
    };

    Box::pin(futures::stream::unfold(cursor, |mut cursor| async move {
        if cursor.slot.is_none() {
            return None;
        }
        if cursor.next == cursor.plan.chunk_count {
            cursor.metrics.increment_streams_completed();
            debug!(phase = %RequestPhase::Completed, locator = %cursor.locator, bytes = cursor.yielded);
            cursor.finish();
            return None;
        }

        match cursor.fetch_next().await {
            Ok(bytes) => {
                cursor.next += 1;
                cursor.yielded += bytes.len() as u64;
                cursor.metrics.add_bytes_streamed(bytes.len() as u64);
                Some((Ok(bytes), cursor))
            }
            Err(e) => {
                cursor.metrics.increment_streams_failed();
                cursor.metrics.increment_backend_errors();
                warn!(
                    backend = %cursor.source.name(),
                    locator = %cursor.locator,
                    chunk = cursor.next,
                    error = %e,
                    "stream aborted"
                );
                cursor.finish();
                Some((Err(e), cursor))
            }
        }
    }))
}
