use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, instrument};

use chunkgate_core::{AccessType, FileRecord, NewFile};
use chunkgate_state::{CasResult, KeyKind, StateError, StateKey, StateStore};

use crate::error::GatewayError;

/// Attempts at the optimistic locator update before giving up.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Outcome of [`FileRegistry::create_or_get`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ingested {
    /// The canonical record after ingestion.
    pub record: FileRecord,
    /// `true` when this call created the record.
    pub created: bool,
}

/// Content-addressed file records keyed by resource id.
///
/// One resource id maps to exactly one record no matter how often the same
/// content is submitted; resubmissions through another backend only add a
/// locator.
#[derive(Clone)]
pub struct FileRegistry {
    state: Arc<dyn StateStore>,
    namespace: String,
}

impl std::fmt::Debug for FileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRegistry")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl FileRegistry {
    pub fn new(state: Arc<dyn StateStore>, namespace: impl Into<String>) -> Self {
        Self {
            state,
            namespace: namespace.into(),
        }
    }

    fn file_key(&self, resource_id: &str) -> StateKey {
        StateKey::new(self.namespace.as_str(), KeyKind::File, resource_id)
    }

    fn counter_key(&self, resource_id: &str, access_type: AccessType) -> StateKey {
        let suffix = match access_type {
            AccessType::View => "views",
            AccessType::Download => "downloads",
        };
        StateKey::new(
            self.namespace.as_str(),
            KeyKind::Counter,
            format!("{resource_id}:{suffix}"),
        )
    }

    /// Register `file`, or return the existing record for its resource id.
    ///
    /// Exactly one of several concurrent first ingestions inserts; the others
    /// fall through to the locator update and observe the winner's row.
    #[instrument(name = "registry.create_or_get", skip_all, fields(resource_id = %file.resource_id, backend = file.backend_index))]
    pub async fn create_or_get(&self, file: NewFile) -> Result<Ingested, GatewayError> {
        let key = self.file_key(&file.resource_id);
        let backend_index = file.backend_index;
        let locator = file.locator.clone();

        let fresh = file.into_record(Utc::now());
        let json = serde_json::to_string(&fresh).map_err(StateError::from)?;
        if self.state.check_and_set(&key, &json).await? {
            debug!("file registered");
            return Ok(Ingested {
                record: fresh,
                created: true,
            });
        }

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some((raw, version)) = self.state.get_versioned(&key).await? else {
                // Removed between the insert attempt and the read.
                if self.state.check_and_set(&key, &json).await? {
                    return Ok(Ingested {
                        record: fresh,
                        created: true,
                    });
                }
                continue;
            };

            let mut record: FileRecord = serde_json::from_str(&raw).map_err(StateError::from)?;
            if !record.locators.insert(backend_index, &locator) {
                debug!("file already registered");
                let record = self.with_counters(record).await?;
                return Ok(Ingested {
                    record,
                    created: false,
                });
            }

            let updated = serde_json::to_string(&record).map_err(StateError::from)?;
            match self
                .state
                .compare_and_swap(&key, version, &updated)
                .await?
            {
                CasResult::Ok => {
                    debug!(attempt, "backend locator added");
                    let record = self.with_counters(record).await?;
                    return Ok(Ingested {
                        record,
                        created: false,
                    });
                }
                CasResult::Conflict {
                    current_version, ..
                } => {
                    debug!(attempt, current_version, "locator update conflicted, retrying");
                }
            }
        }

        Err(StateError::Backend(format!(
            "gave up adding locator for {} after {MAX_CAS_ATTEMPTS} conflicting updates",
            key.canonical()
        ))
        .into())
    }

    /// Look up a file record with its current view and download counts.
    pub async fn get(&self, resource_id: &str) -> Result<Option<FileRecord>, GatewayError> {
        let Some(raw) = self.state.get(&self.file_key(resource_id)).await? else {
            return Ok(None);
        };
        let record: FileRecord = serde_json::from_str(&raw).map_err(StateError::from)?;
        Ok(Some(self.with_counters(record).await?))
    }

    /// Count one served response against the file.
    pub async fn record_access(
        &self,
        resource_id: &str,
        access_type: AccessType,
    ) -> Result<u64, GatewayError> {
        let key = self.counter_key(resource_id, access_type);
        let value = self.state.increment(&key, 1).await?;
        Ok(u64::try_from(value).unwrap_or(0))
    }

    pub async fn increment_views(&self, resource_id: &str) -> Result<u64, GatewayError> {
        self.record_access(resource_id, AccessType::View).await
    }

    pub async fn increment_downloads(&self, resource_id: &str) -> Result<u64, GatewayError> {
        self.record_access(resource_id, AccessType::Download).await
    }

    async fn with_counters(&self, mut record: FileRecord) -> Result<FileRecord, GatewayError> {
        record.view_count = self.read_counter(&record.resource_id, AccessType::View).await?;
        record.download_count = self
            .read_counter(&record.resource_id, AccessType::Download)
            .await?;
        Ok(record)
    }

    async fn read_counter(
        &self,
        resource_id: &str,
        access_type: AccessType,
    ) -> Result<u64, GatewayError> {
        let key = self.counter_key(resource_id, access_type);
        match self.state.get(&key).await? {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                StateError::Serialization(format!("counter {}: {e}", key.canonical())).into()
            }),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use chunkgate_state_memory::MemoryStateStore;

    use super::*;

    fn registry() -> FileRegistry {
        FileRegistry::new(Arc::new(MemoryStateStore::new()), "test")
    }

    fn new_file(uploader: &str, backend_index: u32, locator: &str) -> NewFile {
        NewFile {
            resource_id: "res-1".into(),
            name: Some("movie.mp4".into()),
            size_bytes: 4096,
            mime_type: Some("video/mp4".into()),
            uploader_id: uploader.into(),
            backend_index,
            locator: locator.into(),
        }
    }

    #[tokio::test]
    async fn first_ingestion_creates_record() {
        let reg = registry();
        let out = reg.create_or_get(new_file("alice", 0, "msg-1")).await.unwrap();
        assert!(out.created);
        assert_eq!(out.record.locators.get(0), Some("msg-1"));

        let stored = reg.get("res-1").await.unwrap().unwrap();
        assert_eq!(stored.uploader_id, "alice");
        assert_eq!(stored.size_bytes, 4096);
    }

    #[tokio::test]
    async fn same_resource_from_other_backend_adds_locator() {
        let reg = registry();
        reg.create_or_get(new_file("alice", 0, "msg-1")).await.unwrap();
        let out = reg.create_or_get(new_file("bob", 1, "msg-9")).await.unwrap();

        assert!(!out.created);
        assert_eq!(out.record.uploader_id, "alice");
        assert_eq!(out.record.locators.len(), 2);
        assert_eq!(out.record.locators.get(1), Some("msg-9"));
    }

    #[tokio::test]
    async fn repeat_ingestion_is_idempotent() {
        let reg = registry();
        reg.create_or_get(new_file("alice", 0, "msg-1")).await.unwrap();
        let again = reg.create_or_get(new_file("alice", 0, "msg-1")).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.record.locators.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_ingestion_has_one_winner() {
        let reg = registry();
        let futures: Vec<_> = (0..10)
            .map(|i| reg.create_or_get(new_file(&format!("user-{i}"), i, &format!("msg-{i}"))))
            .collect();
        let results: Vec<_> = futures::future::join_all(futures)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(results.iter().filter(|r| r.created).count(), 1);
        let stored = reg.get("res-1").await.unwrap().unwrap();
        assert_eq!(stored.locators.len(), 10);
    }

    #[tokio::test]
    async fn counters_merge_into_record() {
        let reg = registry();
        reg.create_or_get(new_file("alice", 0, "msg-1")).await.unwrap();
        reg.increment_views("res-1").await.unwrap();
        reg.increment_views("res-1").await.unwrap();
        reg.increment_downloads("res-1").await.unwrap();

        let stored = reg.get("res-1").await.unwrap().unwrap();
        assert_eq!(stored.view_count, 2);
        assert_eq!(stored.download_count, 1);
    }

    #[tokio::test]
    async fn unknown_resource_is_none() {
        assert!(registry().get("missing").await.unwrap().is_none());
    }
}
