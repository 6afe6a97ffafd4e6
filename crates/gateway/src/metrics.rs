use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking gateway request outcomes.
///
/// All counters use relaxed ordering for maximum throughput. For a
/// consistent point-in-time view, call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Signed links issued.
    pub links_issued: AtomicU64,
    /// Link requests refused by the rate limiter.
    pub links_rate_limited: AtomicU64,
    /// Files registered for the first time.
    pub files_ingested: AtomicU64,
    /// Ingestions that matched an existing file.
    pub files_deduplicated: AtomicU64,
    /// Streaming responses handed to clients.
    pub streams_opened: AtomicU64,
    /// Streams that delivered every requested byte.
    pub streams_completed: AtomicU64,
    /// Streams aborted by a backend failure.
    pub streams_failed: AtomicU64,
    /// Payload bytes yielded to clients.
    pub bytes_streamed: AtomicU64,
    /// Requests rejected because the link expired.
    pub links_expired: AtomicU64,
    /// Requests rejected by the integrity check.
    pub links_invalid: AtomicU64,
    /// Requests for unknown or vanished resources.
    pub not_found: AtomicU64,
    /// Requests with a range outside the file.
    pub range_unsatisfiable: AtomicU64,
    /// Backend calls that failed.
    pub backend_errors: AtomicU64,
    /// Property lookups retried on another backend.
    pub backend_retries: AtomicU64,
    /// Counter or access-log writes that failed.
    pub side_effect_errors: AtomicU64,
}

impl GatewayMetrics {
    /// Increment the links issued counter.
    pub fn increment_links_issued(&self) {
        self.links_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the links rate limited counter.
    pub fn increment_links_rate_limited(&self) {
        self.links_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the files ingested counter.
    pub fn increment_files_ingested(&self) {
        self.files_ingested.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the files deduplicated counter.
    pub fn increment_files_deduplicated(&self) {
        self.files_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the streams opened counter.
    pub fn increment_streams_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the streams completed counter.
    pub fn increment_streams_completed(&self) {
        self.streams_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the streams failed counter.
    pub fn increment_streams_failed(&self) {
        self.streams_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `bytes` to the streamed byte total.
    pub fn add_bytes_streamed(&self, bytes: u64) {
        self.bytes_streamed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Increment the links expired counter.
    pub fn increment_links_expired(&self) {
        self.links_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the links invalid counter.
    pub fn increment_links_invalid(&self) {
        self.links_invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the not found counter.
    pub fn increment_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the range unsatisfiable counter.
    pub fn increment_range_unsatisfiable(&self) {
        self.range_unsatisfiable.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the backend errors counter.
    pub fn increment_backend_errors(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the backend retries counter.
    pub fn increment_backend_retries(&self) {
        self.backend_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the side effect errors counter.
    pub fn increment_side_effect_errors(&self) {
        self.side_effect_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            links_issued: self.links_issued.load(Ordering::Relaxed),
            links_rate_limited: self.links_rate_limited.load(Ordering::Relaxed),
            files_ingested: self.files_ingested.load(Ordering::Relaxed),
            files_deduplicated: self.files_deduplicated.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            streams_failed: self.streams_failed.load(Ordering::Relaxed),
            bytes_streamed: self.bytes_streamed.load(Ordering::Relaxed),
            links_expired: self.links_expired.load(Ordering::Relaxed),
            links_invalid: self.links_invalid.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            range_unsatisfiable: self.range_unsatisfiable.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            backend_retries: self.backend_retries.load(Ordering::Relaxed),
            side_effect_errors: self.side_effect_errors.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`GatewayMetrics`] at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub links_issued: u64,
    pub links_rate_limited: u64,
    pub files_ingested: u64,
    pub files_deduplicated: u64,
    pub streams_opened: u64,
    pub streams_completed: u64,
    pub streams_failed: u64,
    pub bytes_streamed: u64,
    pub links_expired: u64,
    pub links_invalid: u64,
    pub not_found: u64,
    pub range_unsatisfiable: u64,
    pub backend_errors: u64,
    pub backend_retries: u64,
    pub side_effect_errors: u64,
}
