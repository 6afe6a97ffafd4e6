use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Analytics record for an issued signed link.
///
/// Authorization never consults this record: a link is valid purely on its
/// expiry and integrity tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Unique identifier (UUID-v7, assigned on issuance).
    pub id: Uuid,
    /// File the link points at.
    pub resource_id: String,
    /// User the link was issued to.
    pub issued_to: String,
    /// Expiry as Unix epoch seconds.
    pub expiry: i64,
    /// Truncated integrity tag embedded in the URL.
    pub integrity_tag: String,
    /// Number of times the link has been opened.
    #[serde(default)]
    pub access_count: u64,
    /// When the link was last opened.
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Whether the link is still listed as active.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// When the link was issued.
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl LinkRecord {
    /// Create a record for a freshly issued link.
    #[must_use]
    pub fn new(
        resource_id: impl Into<String>,
        issued_to: impl Into<String>,
        expiry: i64,
        integrity_tag: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            resource_id: resource_id.into(),
            issued_to: issued_to.into(),
            expiry,
            integrity_tag: integrity_tag.into(),
            access_count: 0,
            last_accessed_at: None,
            is_active: true,
            created_at,
        }
    }

    /// Identifier used to find the record from the URL tuple.
    #[must_use]
    pub fn lookup_id(resource_id: &str, expiry: i64, integrity_tag: &str) -> String {
        format!("{resource_id}:{expiry}:{integrity_tag}")
    }
}
