use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use chunkgate_core::LinkRecord;
use chunkgate_state::{CasResult, KeyKind, StateError, StateKey, StateStore};

use crate::error::GatewayError;

const MAX_CAS_ATTEMPTS: usize = 8;

/// Analytics ledger of issued links.
///
/// Records are keyed by the URL tuple so a request can find its record
/// without any extra index. Authorization never reads the ledger.
#[derive(Clone)]
pub struct LinkLedger {
    state: Arc<dyn StateStore>,
    namespace: String,
}

impl std::fmt::Debug for LinkLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkLedger")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl LinkLedger {
    pub fn new(state: Arc<dyn StateStore>, namespace: impl Into<String>) -> Self {
        Self {
            state,
            namespace: namespace.into(),
        }
    }

    fn key(&self, resource_id: &str, expiry: i64, integrity_tag: &str) -> StateKey {
        StateKey::new(
            self.namespace.as_str(),
            KeyKind::Link,
            LinkRecord::lookup_id(resource_id, expiry, integrity_tag),
        )
    }

    /// Persist a freshly issued link.
    pub async fn record_issued(&self, record: &LinkRecord) -> Result<(), GatewayError> {
        let key = self.key(&record.resource_id, record.expiry, &record.integrity_tag);
        let json = serde_json::to_string(record).map_err(StateError::from)?;
        self.state.set(&key, &json).await?;
        Ok(())
    }

    pub async fn find(
        &self,
        resource_id: &str,
        expiry: i64,
        integrity_tag: &str,
    ) -> Result<Option<LinkRecord>, GatewayError> {
        let key = self.key(resource_id, expiry, integrity_tag);
        match self.state.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(StateError::from)?)),
            None => Ok(None),
        }
    }

    /// Count one access of the link and stamp its last access time.
    ///
    /// Returns the record id, or `None` when the link is not in the ledger.
    pub async fn record_access(
        &self,
        resource_id: &str,
        expiry: i64,
        integrity_tag: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>, GatewayError> {
        let key = self.key(resource_id, expiry, integrity_tag);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some((raw, version)) = self.state.get_versioned(&key).await? else {
                return Ok(None);
            };
            let mut record: LinkRecord = serde_json::from_str(&raw).map_err(StateError::from)?;
            record.access_count += 1;
            record.last_accessed_at = Some(at);
            let json = serde_json::to_string(&record).map_err(StateError::from)?;
            match self.state.compare_and_swap(&key, version, &json).await? {
                CasResult::Ok => return Ok(Some(record.id)),
                CasResult::Conflict { .. } => debug!(link_id = %record.id, "link access update conflicted"),
            }
        }
        Err(StateError::Backend(format!(
            "gave up recording access for {} after {MAX_CAS_ATTEMPTS} conflicting updates",
            key.canonical()
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use chunkgate_state_memory::MemoryStateStore;

    use super::*;

    fn ledger() -> LinkLedger {
        LinkLedger::new(Arc::new(MemoryStateStore::new()), "test")
    }

    #[tokio::test]
    async fn issued_link_can_be_found_by_url_tuple() {
        let ledger = ledger();
        let record = LinkRecord::new("res", "alice", 1_700_000_000, "00112233aabbccdd", Utc::now());
        ledger.record_issued(&record).await.unwrap();

        let found = ledger
            .find("res", 1_700_000_000, "00112233aabbccdd")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, record);
        assert!(ledger.find("res", 1_700_000_001, "00112233aabbccdd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn access_updates_count_and_timestamp() {
        let ledger = ledger();
        let record = LinkRecord::new("res", "alice", 42, "tag", Utc::now());
        ledger.record_issued(&record).await.unwrap();

        let at = Utc::now();
        let id = ledger.record_access("res", 42, "tag", at).await.unwrap();
        ledger.record_access("res", 42, "tag", at).await.unwrap();

        assert_eq!(id, Some(record.id));
        let found = ledger.find("res", 42, "tag").await.unwrap().unwrap();
        assert_eq!(found.access_count, 2);
        assert_eq!(found.last_accessed_at, Some(at));
    }

    #[tokio::test]
    async fn access_of_unrecorded_link_is_none() {
        let id = ledger().record_access("res", 42, "tag", Utc::now()).await.unwrap();
        assert!(id.is_none());
    }
}
