use async_trait::async_trait;
use dashmap::DashMap;

use chunkgate_state::error::StateError;
use chunkgate_state::key::{KeyKind, StateKey};
use chunkgate_state::store::{CasResult, StateStore};

/// A single entry in the in-memory store.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    version: u64,
}

/// In-memory [`StateStore`] backed by [`DashMap`]s.
///
/// Logs are kept per key in insertion order. Nothing survives a restart, so
/// this backend suits tests and single-node development.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: DashMap<String, Entry>,
    logs: DashMap<String, Vec<String>>,
}

impl MemoryStateStore {
    /// Create a new, empty in-memory state store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, logs excluded.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render a [`StateKey`] into the string used as the map key.
    fn render_key(key: &StateKey) -> String {
        key.canonical()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn check_and_set(&self, key: &StateKey, value: &str) -> Result<bool, StateError> {
        // The entry API holds the shard lock, so only one caller can insert.
        let was_inserted = match self.data.entry(Self::render_key(key)) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.to_owned(),
                    version: 1,
                });
                true
            }
        };

        Ok(was_inserted)
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        Ok(self.get_versioned(key).await?.map(|(value, _)| value))
    }

    async fn get_versioned(&self, key: &StateKey) -> Result<Option<(String, u64)>, StateError> {
        Ok(self
            .data
            .get(&Self::render_key(key))
            .map(|entry| (entry.value.clone(), entry.version)))
    }

    async fn set(&self, key: &StateKey, value: &str) -> Result<(), StateError> {
        self.data
            .entry(Self::render_key(key))
            .and_modify(|entry| {
                value.clone_into(&mut entry.value);
                entry.version += 1;
            })
            .or_insert_with(|| Entry {
                value: value.to_owned(),
                version: 1,
            });

        Ok(())
    }

    async fn increment(&self, key: &StateKey, delta: i64) -> Result<i64, StateError> {
        let mut ref_mut = self
            .data
            .entry(Self::render_key(key))
            .or_insert_with(|| Entry {
                value: "0".to_owned(),
                version: 0,
            });

        let current: i64 = ref_mut
            .value
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                StateError::Serialization(format!("counter value is not an integer: {e}"))
            })?;

        let new_value = current + delta;
        ref_mut.value = new_value.to_string();
        ref_mut.version += 1;

        Ok(new_value)
    }

    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
    ) -> Result<CasResult, StateError> {
        let Some(mut entry) = self.data.get_mut(&Self::render_key(key)) else {
            return Ok(CasResult::Conflict {
                current_value: None,
                current_version: 0,
            });
        };

        if entry.version != expected_version {
            return Ok(CasResult::Conflict {
                current_value: Some(entry.value.clone()),
                current_version: entry.version,
            });
        }

        new_value.clone_into(&mut entry.value);
        entry.version += 1;

        Ok(CasResult::Ok)
    }

    async fn scan_keys(
        &self,
        namespace: &str,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError> {
        let mut key_prefix = StateKey::kind_prefix(namespace, &kind);
        if let Some(p) = prefix {
            key_prefix.push_str(p);
        }

        Ok(self
            .data
            .iter()
            .filter(|e| e.key().starts_with(&key_prefix))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect())
    }

    async fn append(&self, key: &StateKey, value: &str) -> Result<(), StateError> {
        self.logs
            .entry(Self::render_key(key))
            .or_default()
            .push(value.to_owned());
        Ok(())
    }

    async fn read_log(&self, key: &StateKey, limit: usize) -> Result<Vec<String>, StateError> {
        Ok(self
            .logs
            .get(&Self::render_key(key))
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chunkgate_state::key::{KeyKind, StateKey};
    use chunkgate_state::testing::run_store_conformance_tests;

    use super::*;

    fn test_key(kind: KeyKind, id: &str) -> StateKey {
        StateKey::new("test-ns", kind, id)
    }

    #[tokio::test]
    async fn conformance() {
        let store = MemoryStateStore::new();
        run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn len_counts_entries_but_not_logs() {
        let store = MemoryStateStore::new();
        assert!(store.is_empty());

        store.set(&test_key(KeyKind::File, "a"), "1").await.unwrap();
        store.increment(&test_key(KeyKind::Counter, "b"), 1).await.unwrap();
        store
            .append(&test_key(KeyKind::AccessLog, "c"), "entry")
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn non_numeric_counter_is_a_serialization_error() {
        let store = MemoryStateStore::new();
        let key = test_key(KeyKind::Counter, "garbled");
        store.set(&key, "not-a-number").await.unwrap();

        let err = store.increment(&key, 1).await.unwrap_err();
        assert!(matches!(err, StateError::Serialization(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_increments_across_tasks() {
        let store = Arc::new(MemoryStateStore::new());
        let key = test_key(KeyKind::Counter, "parallel");

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.increment(&key, 1).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("50"));
    }
}
