use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a backend connection in the configured pool.
pub type BackendIndex = u32;

/// Keyed set of `backend index -> locator` pointers for one file.
///
/// Every locator addresses a copy of the same content on a different backend.
/// There is no cap on the number of replicas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendLocators(BTreeMap<BackendIndex, String>);

impl BackendLocators {
    /// Create an empty locator set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a locator set holding a single pointer.
    #[must_use]
    pub fn single(index: BackendIndex, locator: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(index, locator.into());
        Self(map)
    }

    /// Return the locator stored for `index`, if any.
    #[must_use]
    pub fn get(&self, index: BackendIndex) -> Option<&str> {
        self.0.get(&index).map(String::as_str)
    }

    /// Add or replace the locator for `index`.
    ///
    /// Returns `true` if the set changed. Re-inserting an identical pointer
    /// is a no-op.
    pub fn insert(&mut self, index: BackendIndex, locator: &str) -> bool {
        if self.get(index) == Some(locator) {
            return false;
        }
        self.0.insert(index, locator.to_owned());
        true
    }

    /// Whether a locator exists for `index`.
    #[must_use]
    pub fn contains(&self, index: BackendIndex) -> bool {
        self.0.contains_key(&index)
    }

    /// Backend indices that hold a copy, in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = BackendIndex> + '_ {
        self.0.keys().copied()
    }

    /// Iterate over `(index, locator)` pairs in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (BackendIndex, &str)> + '_ {
        self.0.iter().map(|(i, l)| (*i, l.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Canonical metadata row for one logical file.
///
/// `resource_id` is assigned by the chunk backend and permanently identifies
/// the content. The view and download counters are kept in separate counter
/// entries and merged in when the record is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Backend-assigned unique content identifier.
    pub resource_id: String,
    /// Original file name, when the uploader supplied one.
    #[serde(default)]
    pub name: Option<String>,
    /// Size of the content in bytes.
    pub size_bytes: u64,
    /// MIME type reported at ingestion.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Identifier of the user who first submitted the file.
    pub uploader_id: String,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
    /// Number of inline views served.
    #[serde(default)]
    pub view_count: u64,
    /// Number of attachment downloads served.
    #[serde(default)]
    pub download_count: u64,
    /// Per-backend locators for copies of this content.
    #[serde(default)]
    pub locators: BackendLocators,
}

/// Ingestion request for [`FileRecord`] creation or locator registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub resource_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub size_bytes: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub uploader_id: String,
    pub backend_index: BackendIndex,
    pub locator: String,
}

impl NewFile {
    /// Build the record inserted when this resource has never been seen.
    #[must_use]
    pub fn into_record(self, created_at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            resource_id: self.resource_id,
            name: self.name,
            size_bytes: self.size_bytes,
            mime_type: self.mime_type,
            uploader_id: self.uploader_id,
            created_at,
            view_count: 0,
            download_count: 0,
            locators: BackendLocators::single(self.backend_index, self.locator),
        }
    }
}
