use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use chunkgate_core::{
    AccessLogEntry, AccessType, BackendIndex, Disposition, FileRecord, LinkRecord, NewFile,
    guess_mime_type, mime_extension,
};
use chunkgate_crypto::LinkCodec;
use chunkgate_source::{ChunkSource, FileProperties};
use chunkgate_state::StateStore;

use crate::access_log::AccessLog;
use crate::balancer::{BackendPool, SessionSlot, WorkloadTable};
use crate::error::GatewayError;
use crate::limiter::RateLimiter;
use crate::links::LinkLedger;
use crate::metrics::GatewayMetrics;
use crate::range::{ByteRange, ChunkPlan, parse_range_header, resolve_range};
use crate::registry::{FileRegistry, Ingested};
use crate::stream::{ByteStream, chunk_stream, empty_stream};

const FALLBACK_MIME: &str = "application/octet-stream";

/// Backend attempts for the property lookup: the first choice plus one retry.
const BACKEND_ATTEMPTS: usize = 2;

/// Lifecycle phases of a streaming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    LinkReceived,
    Verified,
    Resolved,
    Balanced,
    Streaming,
    Completed,
}

impl RequestPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinkReceived => "link_received",
            Self::Verified => "verified",
            Self::Resolved => "resolved",
            Self::Balanced => "balanced",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming signed-link request.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub resource_id: String,
    /// Expiry path segment as received; parsed during verification.
    pub expiry: String,
    pub integrity_tag: String,
    /// Raw `Range` header value.
    pub range: Option<String>,
    /// Backend requested with `?backend=N`.
    pub pinned_backend: Option<BackendIndex>,
    pub client_address: String,
    pub user_agent: Option<String>,
    /// Validate and describe the response without fetching content or
    /// recording the access.
    pub head_only: bool,
}

/// A response ready to be written to the client.
pub struct StreamResponse {
    /// 206 when a range was requested, else 200.
    pub status: u16,
    pub file_size: u64,
    /// Bytes served; `None` for an empty file.
    pub range: Option<ByteRange>,
    pub content_length: u64,
    pub mime_type: String,
    pub file_name: String,
    pub disposition: Disposition,
    /// Backend serving the content.
    pub backend: BackendIndex,
    pub body: ByteStream,
}

impl StreamResponse {
    /// `Content-Range` header value, when the file has any bytes.
    pub fn content_range(&self) -> Option<String> {
        self.range.map(|r| r.content_range(self.file_size))
    }

    /// `Content-Disposition` header value.
    pub fn content_disposition(&self) -> String {
        let name: String = self
            .file_name
            .chars()
            .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
            .collect();
        format!("{}; filename=\"{name}\"", self.disposition)
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("file_size", &self.file_size)
            .field("range", &self.range)
            .field("content_length", &self.content_length)
            .field("mime_type", &self.mime_type)
            .field("file_name", &self.file_name)
            .field("disposition", &self.disposition)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// A link handed out by [`Gateway::issue_link`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedLink {
    pub link_id: Uuid,
    pub resource_id: String,
    pub expiry: i64,
    pub tag: String,
    /// `/{resource_id}/{expiry}/{tag}`
    pub path: String,
}

/// Backend chosen for a request, with its session held open.
struct BoundBackend {
    index: BackendIndex,
    source: Arc<dyn ChunkSource>,
    locator: String,
    properties: FileProperties,
    slot: SessionSlot,
}

/// The streaming gateway.
///
/// Verifies signed links, resolves files in the registry, balances across
/// backends and turns byte ranges into lazy chunk streams. Counter and log
/// writes for served requests run in the background and never affect the
/// response.
pub struct Gateway {
    pub(crate) codec: LinkCodec,
    pub(crate) registry: FileRegistry,
    pub(crate) ledger: LinkLedger,
    pub(crate) access_log: AccessLog,
    pub(crate) limiter: RateLimiter,
    pub(crate) pool: BackendPool,
    pub(crate) workload: Arc<WorkloadTable>,
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) chunk_size: u64,
    pub(crate) default_ttl_seconds: u64,
    pub(crate) metrics: Arc<GatewayMetrics>,
    pub(crate) side_effects: TaskTracker,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("pool", &self.pool)
            .field("chunk_size", &self.chunk_size)
            .field("default_ttl_seconds", &self.default_ttl_seconds)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn workload(&self) -> &WorkloadTable {
        &self.workload
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &LinkLedger {
        &self.ledger
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access_log
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn codec(&self) -> &LinkCodec {
        &self.codec
    }

    /// Shared state store, for components outside the gateway that persist
    /// their own data.
    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn default_ttl_seconds(&self) -> u64 {
        self.default_ttl_seconds
    }

    /// Serve a signed-link request.
    ///
    /// Walks `LinkReceived -> Verified -> Resolved -> Balanced -> Streaming`.
    /// Any failure before streaming ends the request with the matching
    /// [`GatewayError`]. The link's expiry is checked once here; a stream
    /// already under way is not cut off when the link expires.
    #[instrument(
        name = "gateway.open",
        skip(self, request),
        fields(
            resource_id = %request.resource_id,
            head = request.head_only,
            pinned = ?request.pinned_backend,
        )
    )]
    pub async fn open(&self, request: StreamRequest) -> Result<StreamResponse, GatewayError> {
        let result = self.open_inner(request).await;
        if let Err(ref e) = result {
            self.record_failure(e);
            debug!(error = %e, "request rejected");
        }
        result
    }

    async fn open_inner(&self, request: StreamRequest) -> Result<StreamResponse, GatewayError> {
        debug!(phase = %RequestPhase::LinkReceived);
        let now = Utc::now();
        let expiry = self.codec.verify_segments(
            &request.resource_id,
            &request.expiry,
            &request.integrity_tag,
            now.timestamp(),
        )?;
        debug!(phase = %RequestPhase::Verified, expiry);

        let record = self
            .registry
            .get(&request.resource_id)
            .await?
            .ok_or_else(|| GatewayError::ResourceNotFound(request.resource_id.clone()))?;
        debug!(phase = %RequestPhase::Resolved, backends = record.locators.len());

        let bound = self.bind_backend(&record, request.pinned_backend).await?;
        debug!(phase = %RequestPhase::Balanced, backend = bound.index, size = bound.properties.size_bytes);

        let file_size = bound.properties.size_bytes;
        let spec = request.range.as_deref().and_then(parse_range_header);
        let range = resolve_range(spec, file_size)?;
        let status = if spec.is_some() { 206 } else { 200 };

        let mime_type = resolve_mime(&bound.properties, &record);
        let file_name = resolve_name(&bound.properties, &record, &mime_type);
        let disposition = Disposition::for_mime(&mime_type);
        let content_length = range.map_or(0, |r| r.len());

        let BoundBackend {
            index,
            source,
            locator,
            slot,
            ..
        } = bound;

        let body = match range {
            Some(range) if !request.head_only => chunk_stream(
                source,
                locator,
                ChunkPlan::new(range, self.chunk_size),
                slot,
                Arc::clone(&self.metrics),
            ),
            _ => {
                drop(slot);
                empty_stream()
            }
        };

        if !request.head_only {
            self.metrics.increment_streams_opened();
            if range.is_none() {
                self.metrics.increment_streams_completed();
            }
            self.spawn_side_effects(
                &request,
                expiry,
                disposition.access_type(),
                now,
            );
        }
        debug!(phase = %RequestPhase::Streaming, status, content_length, %disposition);

        Ok(StreamResponse {
            status,
            file_size,
            range,
            content_length,
            mime_type,
            file_name,
            disposition,
            backend: index,
            body,
        })
    }

    /// Pick a backend and read the file's properties from it.
    ///
    /// An unavailable backend is retried once on the next choice among the
    /// remaining candidates.
    async fn bind_backend(
        &self,
        record: &FileRecord,
        pinned: Option<BackendIndex>,
    ) -> Result<BoundBackend, GatewayError> {
        let mut tried: Vec<BackendIndex> = Vec::with_capacity(BACKEND_ATTEMPTS);
        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..BACKEND_ATTEMPTS {
            let Some(index) = self
                .pool
                .choose(&self.workload, &record.locators, pinned, &tried)
            else {
                break;
            };
            let (Some(source), Some(locator)) = (self.pool.get(index), record.locators.get(index))
            else {
                break;
            };
            if attempt > 0 {
                self.metrics.increment_backend_retries();
            }

            let slot = self.workload.acquire(index);
            match source.properties(locator).await {
                Ok(properties) => {
                    return Ok(BoundBackend {
                        index,
                        source: Arc::clone(source),
                        locator: locator.to_owned(),
                        properties,
                        slot,
                    });
                }
                Err(e) if e.is_retryable() => {
                    self.metrics.increment_backend_errors();
                    warn!(backend = index, name = %source.name(), error = %e, "backend unavailable");
                    tried.push(index);
                    last_error = Some(e.into());
                }
                Err(e) => {
                    self.metrics.increment_backend_errors();
                    return Err(e.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::BackendUnavailable(format!(
                "no configured backend holds {}",
                record.resource_id
            ))
        }))
    }

    fn record_failure(&self, err: &GatewayError) {
        match err {
            GatewayError::LinkExpired { .. } => self.metrics.increment_links_expired(),
            GatewayError::LinkInvalid => self.metrics.increment_links_invalid(),
            GatewayError::ResourceNotFound(_) => self.metrics.increment_not_found(),
            GatewayError::RangeUnsatisfiable { .. } => {
                self.metrics.increment_range_unsatisfiable();
            }
            _ => {}
        }
    }

    /// Count the access against the file and link and append it to the
    /// access log, in the background.
    fn spawn_side_effects(
        &self,
        request: &StreamRequest,
        expiry: i64,
        access_type: AccessType,
        at: DateTime<Utc>,
    ) {
        let registry = self.registry.clone();
        let ledger = self.ledger.clone();
        let access_log = self.access_log.clone();
        let metrics = Arc::clone(&self.metrics);
        let resource_id = request.resource_id.clone();
        let tag = request.integrity_tag.clone();
        let client_address = request.client_address.clone();
        let user_agent = request.user_agent.clone();

        self.side_effects.spawn(async move {
            if let Err(e) = registry.record_access(&resource_id, access_type).await {
                metrics.increment_side_effect_errors();
                warn!(error = %e, %resource_id, "access counter update failed");
            }

            let link_id = match ledger.record_access(&resource_id, expiry, &tag, at).await {
                Ok(id) => id,
                Err(e) => {
                    metrics.increment_side_effect_errors();
                    warn!(error = %e, %resource_id, "link access update failed");
                    None
                }
            };

            let entry = AccessLogEntry::new(
                link_id,
                resource_id.as_str(),
                &client_address,
                user_agent.as_deref(),
                access_type,
                at,
            );
            if let Err(e) = access_log.append(&entry).await {
                metrics.increment_side_effect_errors();
                warn!(error = %e, %resource_id, "access log append failed");
            }
        });
    }

    /// Register a file, or add a backend locator to an existing one.
    #[instrument(name = "gateway.ingest", skip_all, fields(resource_id = %file.resource_id, backend = file.backend_index))]
    pub async fn ingest(&self, file: NewFile) -> Result<Ingested, GatewayError> {
        if !self.pool.contains(file.backend_index) {
            return Err(GatewayError::UnknownBackend(file.backend_index));
        }
        let ingested = self.registry.create_or_get(file).await?;
        if ingested.created {
            self.metrics.increment_files_ingested();
            info!("file ingested");
        } else {
            self.metrics.increment_files_deduplicated();
            debug!(locators = ingested.record.locators.len(), "file deduplicated");
        }
        Ok(ingested)
    }

    /// Issue a signed link to `issued_to` for a registered file.
    ///
    /// The user must pass every rate-limit window. `ttl_seconds` defaults to
    /// the gateway's configured lifetime; a lifetime that cannot be turned
    /// into an expiry is refused before any window is charged.
    #[instrument(name = "gateway.issue_link", skip_all, fields(%resource_id, %issued_to))]
    pub async fn issue_link(
        &self,
        resource_id: &str,
        issued_to: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<IssuedLink, GatewayError> {
        if self.registry.get(resource_id).await?.is_none() {
            self.metrics.increment_not_found();
            return Err(GatewayError::ResourceNotFound(resource_id.to_owned()));
        }

        let now = Utc::now();
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let link = self.codec.issue(resource_id, ttl, now.timestamp())?;

        if let Err(e) = self.limiter.admit_at(issued_to, now).await {
            if matches!(e, GatewayError::RateLimitExceeded { .. }) {
                self.metrics.increment_links_rate_limited();
            }
            return Err(e);
        }

        let record = LinkRecord::new(resource_id, issued_to, link.expiry, link.tag.as_str(), now);
        self.ledger.record_issued(&record).await?;
        self.metrics.increment_links_issued();
        info!(link_id = %record.id, expiry = link.expiry, "link issued");

        Ok(IssuedLink {
            link_id: record.id,
            path: link.path(),
            resource_id: link.resource_id,
            expiry: link.expiry,
            tag: link.tag,
        })
    }

    /// Wait for pending background writes, refusing new ones.
    pub async fn shutdown(&self) {
        self.side_effects.close();
        self.side_effects.wait().await;
        info!("gateway shutdown complete");
    }
}

/// Backend MIME, else registry MIME, else a guess from the name.
fn resolve_mime(properties: &FileProperties, record: &FileRecord) -> String {
    properties
        .mime_type
        .as_deref()
        .or(record.mime_type.as_deref())
        .filter(|m| !m.trim().is_empty())
        .map(str::to_owned)
        .or_else(|| {
            properties
                .name
                .as_deref()
                .or(record.name.as_deref())
                .and_then(guess_mime_type)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| FALLBACK_MIME.to_owned())
}

/// Backend name, else registry name, else a random token with an extension
/// derived from the MIME type.
fn resolve_name(properties: &FileProperties, record: &FileRecord, mime_type: &str) -> String {
    if let Some(name) = properties
        .name
        .as_deref()
        .or(record.name.as_deref())
        .filter(|n| !n.trim().is_empty())
    {
        return name.to_owned();
    }
    let mut token = [0u8; 2];
    OsRng.fill_bytes(&mut token);
    format!("{}.{}", hex::encode(token), mime_extension(mime_type))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chunkgate_core::WindowKind;
    use chunkgate_crypto::SecretString;
    use chunkgate_source::MemoryChunkSource;
    use chunkgate_state_memory::MemoryStateStore;
    use futures::StreamExt;

    use super::*;
    use crate::builder::GatewayBuilder;

    const SECRET: &str = "unit-test-secret";

    struct Harness {
        gateway: Gateway,
        primary: Arc<MemoryChunkSource>,
        replica: Arc<MemoryChunkSource>,
    }

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    async fn harness() -> Harness {
        let primary = Arc::new(MemoryChunkSource::new("mem-0"));
        let replica = Arc::new(MemoryChunkSource::new("mem-1"));
        primary.insert("loc-a0", content(3000), Some("video/mp4"), Some("clip.mp4"));
        replica.insert("loc-a1", content(3000), Some("video/mp4"), Some("clip.mp4"));
        primary.insert("loc-doc", content(10), None, None);
        primary.insert("loc-empty", Vec::<u8>::new(), Some("text/plain"), Some("empty.txt"));

        let gateway = GatewayBuilder::new()
            .state(Arc::new(MemoryStateStore::new()))
            .codec(LinkCodec::new(SecretString::new(SECRET.into())).unwrap())
            .backend(0, Arc::clone(&primary) as Arc<dyn ChunkSource>)
            .backend(1, Arc::clone(&replica) as Arc<dyn ChunkSource>)
            .primary_backend(0)
            .chunk_size(1024)
            .build()
            .unwrap();

        for (index, locator) in [(0, "loc-a0"), (1, "loc-a1")] {
            gateway
                .ingest(NewFile {
                    resource_id: "res-a".into(),
                    name: Some("clip.mp4".into()),
                    size_bytes: 3000,
                    mime_type: Some("video/mp4".into()),
                    uploader_id: "alice".into(),
                    backend_index: index,
                    locator: locator.into(),
                })
                .await
                .unwrap();
        }
        for (id, locator, size) in [("res-doc", "loc-doc", 10), ("res-empty", "loc-empty", 0)] {
            gateway
                .ingest(NewFile {
                    resource_id: id.into(),
                    name: None,
                    size_bytes: size,
                    mime_type: None,
                    uploader_id: "bob".into(),
                    backend_index: 0,
                    locator: locator.into(),
                })
                .await
                .unwrap();
        }

        Harness {
            gateway,
            primary,
            replica,
        }
    }

    fn request(gateway: &Gateway, resource_id: &str) -> StreamRequest {
        let expiry = Utc::now().timestamp() + 3600;
        StreamRequest {
            resource_id: resource_id.into(),
            expiry: expiry.to_string(),
            integrity_tag: gateway.codec().compute_tag(resource_id, expiry),
            client_address: "10.1.2.3".into(),
            user_agent: Some("test-agent".into()),
            ..StreamRequest::default()
        }
    }

    async fn body_bytes(mut body: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn whole_file_streams_with_200() {
        let h = harness().await;
        let resp = h.gateway.open(request(&h.gateway, "res-a")).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_length, 3000);
        assert_eq!(resp.content_range().as_deref(), Some("bytes 0-2999/3000"));
        assert_eq!(resp.disposition, Disposition::Inline);
        assert_eq!(resp.content_disposition(), "inline; filename=\"clip.mp4\"");
        assert_eq!(body_bytes(resp.body).await, content(3000));
    }

    #[tokio::test]
    async fn range_request_streams_exact_slice_with_206() {
        let h = harness().await;
        let mut req = request(&h.gateway, "res-a");
        req.range = Some("bytes=1000-2100".into());
        let resp = h.gateway.open(req).await.unwrap();

        assert_eq!(resp.status, 206);
        assert_eq!(resp.content_length, 1101);
        assert_eq!(resp.content_range().as_deref(), Some("bytes 1000-2100/3000"));
        assert_eq!(body_bytes(resp.body).await, content(3000)[1000..=2100].to_vec());
    }

    #[tokio::test]
    async fn expired_link_is_rejected_before_lookup() {
        let h = harness().await;
        let expiry = Utc::now().timestamp() - 10;
        let req = StreamRequest {
            resource_id: "res-a".into(),
            expiry: expiry.to_string(),
            integrity_tag: h.gateway.codec().compute_tag("res-a", expiry),
            ..StreamRequest::default()
        };
        let err = h.gateway.open(req).await.unwrap_err();
        assert!(matches!(err, GatewayError::LinkExpired { .. }));
        assert_eq!(h.gateway.metrics().snapshot().links_expired, 1);
    }

    #[tokio::test]
    async fn tampered_link_is_invalid() {
        let h = harness().await;
        let mut req = request(&h.gateway, "res-a");
        req.resource_id = "res-doc".into();
        assert!(matches!(
            h.gateway.open(req).await.unwrap_err(),
            GatewayError::LinkInvalid
        ));

        let mut req = request(&h.gateway, "res-a");
        req.expiry = "soon".into();
        assert!(matches!(
            h.gateway.open(req).await.unwrap_err(),
            GatewayError::LinkInvalid
        ));
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let h = harness().await;
        let err = h.gateway.open(request(&h.gateway, "nope")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn inverted_range_is_unsatisfiable() {
        let h = harness().await;
        let mut req = request(&h.gateway, "res-doc");
        req.range = Some("bytes=5-2".into());
        let err = h.gateway.open(req).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::RangeUnsatisfiable { file_size: 10 }
        ));
        assert_eq!(h.gateway.workload().active(0), 0);
    }

    #[tokio::test]
    async fn unknown_type_downloads_with_synthesized_name() {
        let h = harness().await;
        let resp = h.gateway.open(request(&h.gateway, "res-doc")).await.unwrap();
        assert_eq!(resp.mime_type, "application/octet-stream");
        assert_eq!(resp.disposition, Disposition::Attachment);
        assert_eq!(resp.file_name.len(), "abcd.octet-stream".len());
        assert!(resp.file_name.ends_with(".octet-stream"));
    }

    #[tokio::test]
    async fn empty_file_serves_empty_body() {
        let h = harness().await;
        let resp = h.gateway.open(request(&h.gateway, "res-empty")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_length, 0);
        assert!(resp.content_range().is_none());
        assert!(body_bytes(resp.body).await.is_empty());

        let mut req = request(&h.gateway, "res-empty");
        req.range = Some("bytes=0-".into());
        assert!(h.gateway.open(req).await.is_err());
    }

    #[tokio::test]
    async fn head_fetches_no_chunks_and_records_nothing() {
        let h = harness().await;
        let mut req = request(&h.gateway, "res-doc");
        req.head_only = true;
        let resp = h.gateway.open(req).await.unwrap();
        assert_eq!(resp.content_length, 10);
        assert!(body_bytes(resp.body).await.is_empty());

        h.gateway.shutdown().await;
        assert!(h.primary.fetches().is_empty());
        let record = h.gateway.registry().get("res-doc").await.unwrap().unwrap();
        assert_eq!(record.download_count, 0);
        assert!(h.gateway.access_log().recent("res-doc", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_request_records_side_effects() {
        let h = harness().await;
        let link = h.gateway.issue_link("res-a", "carol", Some(600)).await.unwrap();
        let req = StreamRequest {
            resource_id: link.resource_id.clone(),
            expiry: link.expiry.to_string(),
            integrity_tag: link.tag.clone(),
            client_address: "10.1.2.3".into(),
            ..StreamRequest::default()
        };
        let resp = h.gateway.open(req).await.unwrap();
        body_bytes(resp.body).await;
        h.gateway.shutdown().await;

        let record = h.gateway.registry().get("res-a").await.unwrap().unwrap();
        assert_eq!(record.view_count, 1);
        assert_eq!(record.download_count, 0);

        let ledger = h
            .gateway
            .ledger()
            .find("res-a", link.expiry, &link.tag)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ledger.access_count, 1);

        let log = h.gateway.access_log().recent("res-a", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].link_id, Some(link.link_id));
        assert_eq!(log[0].client_address, "10.1.2.xxx");
        assert_eq!(log[0].access_type, AccessType::View);
    }

    #[tokio::test]
    async fn least_loaded_backend_serves_and_slot_is_held_while_streaming() {
        let h = harness().await;
        let _busy = h.gateway.workload().acquire(0);
        let resp = h.gateway.open(request(&h.gateway, "res-a")).await.unwrap();
        assert_eq!(resp.backend, 1);
        assert_eq!(h.gateway.workload().active(1), 1);
        drop(resp);
        assert_eq!(h.gateway.workload().active(1), 0);
    }

    #[tokio::test]
    async fn pinned_backend_is_honoured() {
        let h = harness().await;
        let _busy = h.gateway.workload().acquire(1);
        let mut req = request(&h.gateway, "res-a");
        req.pinned_backend = Some(1);
        let resp = h.gateway.open(req).await.unwrap();
        assert_eq!(resp.backend, 1);
    }

    #[tokio::test]
    async fn unavailable_backend_is_retried_once_elsewhere() {
        let h = harness().await;
        h.primary.set_unavailable(true);
        let mut req = request(&h.gateway, "res-a");
        req.pinned_backend = Some(0);
        let resp = h.gateway.open(req).await.unwrap();
        assert_eq!(resp.backend, 1);
        assert_eq!(body_bytes(resp.body).await.len(), 3000);

        let snap = h.gateway.metrics().snapshot();
        assert_eq!(snap.backend_retries, 1);
        assert_eq!(snap.backend_errors, 1);
        assert_eq!(h.gateway.workload().active(0), 0);
    }

    #[tokio::test]
    async fn all_backends_down_is_backend_unavailable() {
        let h = harness().await;
        h.primary.set_unavailable(true);
        h.replica.set_unavailable(true);
        let err = h.gateway.open(request(&h.gateway, "res-a")).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable(_)));
        assert_eq!(h.gateway.workload().active(0), 0);
        assert_eq!(h.gateway.workload().active(1), 0);
    }

    #[tokio::test]
    async fn issue_link_enforces_rate_limit() {
        let h = harness().await;
        let link = h.gateway.issue_link("res-a", "dave", None).await.unwrap();
        assert_eq!(link.path, format!("/res-a/{}/{}", link.expiry, link.tag));
        assert!(link.expiry - Utc::now().timestamp() > 604_000);

        let err = h.gateway.issue_link("res-a", "dave", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimitExceeded { .. }));
        assert_eq!(h.gateway.metrics().snapshot().links_rate_limited, 1);
    }

    #[tokio::test]
    async fn overlong_lifetime_is_refused_without_charging_limits() {
        let h = harness().await;
        let err = h
            .gateway
            .issue_link("res-a", "fiona", Some(u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidLinkLifetime {
                ttl_seconds: u64::MAX
            }
        ));

        let now = Utc::now();
        for window in WindowKind::ALL {
            assert_eq!(
                h.gateway.limiter().count_at("fiona", window, now).await.unwrap(),
                0
            );
        }
        h.gateway.issue_link("res-a", "fiona", Some(60)).await.unwrap();
    }

    #[tokio::test]
    async fn issue_link_requires_registered_file() {
        let h = harness().await;
        let err = h.gateway.issue_link("nope", "erin", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn ingest_counts_dedup_and_rejects_unknown_backend() {
        let h = harness().await;
        let snap = h.gateway.metrics().snapshot();
        assert_eq!(snap.files_ingested, 3);
        assert_eq!(snap.files_deduplicated, 1);

        let err = h
            .gateway
            .ingest(NewFile {
                resource_id: "res-x".into(),
                name: None,
                size_bytes: 1,
                mime_type: None,
                uploader_id: "bob".into(),
                backend_index: 9,
                locator: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownBackend(9)));
    }
}
