//! Request and response bodies of the JSON endpoints.

use chunkgate_core::BackendIndex;
use chunkgate_gateway::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backends: Vec<BackendHealth>,
    pub metrics: MetricsSnapshot,
}

/// Live state of one configured backend.
#[derive(Debug, Serialize)]
pub struct BackendHealth {
    pub index: BackendIndex,
    pub name: String,
    pub primary: bool,
    /// Streams currently reading from this backend.
    pub active_sessions: u64,
}

/// Body of `POST /v1/links`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssueLinkRequest {
    pub resource_id: String,
    /// User the link is issued to; rate limits apply per user.
    pub issued_to: String,
    /// Link lifetime. Defaults to `[links] default_ttl_seconds`.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// Response of `POST /v1/links`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssueLinkResponse {
    pub link_id: Uuid,
    pub resource_id: String,
    pub expiry: i64,
    pub tag: String,
    pub path: String,
    /// `path` prefixed with the server's public base URL.
    pub url: String,
}
