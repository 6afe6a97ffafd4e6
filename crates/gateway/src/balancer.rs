//! Backend pool, per-backend session accounting and least-loaded selection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use chunkgate_core::{BackendIndex, BackendLocators};
use chunkgate_source::ChunkSource;

/// Configured backend connections keyed by backend index.
#[derive(Clone)]
pub struct BackendPool {
    backends: BTreeMap<BackendIndex, Arc<dyn ChunkSource>>,
    primary: BackendIndex,
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: BTreeMap<_, _> = self
            .backends
            .iter()
            .map(|(index, source)| (*index, source.name().to_owned()))
            .collect();
        f.debug_struct("BackendPool")
            .field("backends", &names)
            .field("primary", &self.primary)
            .finish()
    }
}

impl BackendPool {
    /// Create an empty pool whose fallback backend is `primary`.
    pub fn new(primary: BackendIndex) -> Self {
        Self {
            backends: BTreeMap::new(),
            primary,
        }
    }

    /// Register `source` under `index`, replacing any previous entry.
    pub fn insert(&mut self, index: BackendIndex, source: Arc<dyn ChunkSource>) {
        self.backends.insert(index, source);
    }

    #[must_use]
    pub fn with_backend(mut self, index: BackendIndex, source: Arc<dyn ChunkSource>) -> Self {
        self.insert(index, source);
        self
    }

    pub fn get(&self, index: BackendIndex) -> Option<&Arc<dyn ChunkSource>> {
        self.backends.get(&index)
    }

    pub fn contains(&self, index: BackendIndex) -> bool {
        self.backends.contains_key(&index)
    }

    pub fn primary(&self) -> BackendIndex {
        self.primary
    }

    pub fn indices(&self) -> impl Iterator<Item = BackendIndex> + '_ {
        self.backends.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Pick the backend for a resource stored at `locators`.
    ///
    /// Candidates are configured backends holding a locator, minus `exclude`.
    /// A pinned backend is used when it is a candidate; otherwise the primary
    /// when it is a candidate. Without a pin the least-loaded candidate wins.
    pub fn choose(
        &self,
        workload: &WorkloadTable,
        locators: &BackendLocators,
        pinned: Option<BackendIndex>,
        exclude: &[BackendIndex],
    ) -> Option<BackendIndex> {
        let candidates: Vec<BackendIndex> = locators
            .indices()
            .filter(|index| self.contains(*index) && !exclude.contains(index))
            .collect();

        if let Some(pinned) = pinned {
            if candidates.contains(&pinned) {
                return Some(pinned);
            }
            if candidates.contains(&self.primary) {
                return Some(self.primary);
            }
        }
        select_backend(workload, candidates)
    }
}

/// Return the candidate with the fewest active sessions. Ties go to the
/// first candidate seen.
pub fn select_backend(
    workload: &WorkloadTable,
    candidates: impl IntoIterator<Item = BackendIndex>,
) -> Option<BackendIndex> {
    let mut best: Option<(BackendIndex, u64)> = None;
    for index in candidates {
        let load = workload.active(index);
        if best.is_none_or(|(_, best_load)| load < best_load) {
            best = Some((index, load));
        }
    }
    best.map(|(index, _)| index)
}

/// Shared counters of open streaming sessions per backend.
#[derive(Debug, Default)]
pub struct WorkloadTable {
    counters: DashMap<BackendIndex, Arc<AtomicU64>>,
}

impl WorkloadTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, index: BackendIndex) -> Arc<AtomicU64> {
        Arc::clone(self.counters.entry(index).or_default().value())
    }

    /// Open a session on `index`. The count drops again when the returned
    /// slot is dropped.
    pub fn acquire(&self, index: BackendIndex) -> SessionSlot {
        let counter = self.counter(index);
        counter.fetch_add(1, Ordering::AcqRel);
        SessionSlot { index, counter }
    }

    /// Active sessions on `index`.
    pub fn active(&self, index: BackendIndex) -> u64 {
        self.counters
            .get(&index)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    /// Active sessions per backend that has ever been used.
    pub fn snapshot(&self) -> BTreeMap<BackendIndex, u64> {
        self.counters
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Acquire)))
            .collect()
    }
}

/// One open session on a backend.
#[derive(Debug)]
pub struct SessionSlot {
    index: BackendIndex,
    counter: Arc<AtomicU64>,
}

impl SessionSlot {
    pub fn backend(&self) -> BackendIndex {
        self.index
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use chunkgate_source::MemoryChunkSource;

    use super::*;

    fn pool(indices: &[BackendIndex], primary: BackendIndex) -> BackendPool {
        indices.iter().fold(BackendPool::new(primary), |pool, i| {
            pool.with_backend(*i, Arc::new(MemoryChunkSource::new(format!("mem-{i}"))))
        })
    }

    fn locators(indices: &[BackendIndex]) -> BackendLocators {
        let mut l = BackendLocators::new();
        for i in indices {
            l.insert(*i, &format!("loc-{i}"));
        }
        l
    }

    #[test]
    fn slot_releases_on_drop() {
        let table = WorkloadTable::new();
        let a = table.acquire(1);
        let b = table.acquire(1);
        assert_eq!(table.active(1), 2);
        drop(a);
        assert_eq!(table.active(1), 1);
        drop(b);
        assert_eq!(table.active(1), 0);
    }

    #[test]
    fn least_loaded_wins_and_ties_go_first() {
        let table = WorkloadTable::new();
        let _s0 = table.acquire(0);
        let _s0b = table.acquire(0);
        let _s1 = table.acquire(1);
        assert_eq!(select_backend(&table, [0, 1, 2]), Some(2));
        assert_eq!(select_backend(&table, [0, 1]), Some(1));
        assert_eq!(select_backend(&table, [3, 4]), Some(3));
        assert_eq!(select_backend(&table, []), None);
    }

    #[test]
    fn pinned_backend_bypasses_balancing() {
        let pool = pool(&[0, 1, 2], 0);
        let table = WorkloadTable::new();
        let _busy = table.acquire(2);
        let choice = pool.choose(&table, &locators(&[0, 1, 2]), Some(2), &[]);
        assert_eq!(choice, Some(2));
    }

    #[test]
    fn unusable_pin_falls_back_to_primary() {
        let pool = pool(&[0, 1], 0);
        let table = WorkloadTable::new();
        let _busy = table.acquire(0);
        let choice = pool.choose(&table, &locators(&[0, 1]), Some(7), &[]);
        assert_eq!(choice, Some(0));
    }

    #[test]
    fn unusable_pin_and_primary_fall_back_to_least_loaded() {
        let pool = pool(&[0, 1, 2], 0);
        let table = WorkloadTable::new();
        let _busy = table.acquire(1);
        let choice = pool.choose(&table, &locators(&[1, 2]), Some(7), &[]);
        assert_eq!(choice, Some(2));
    }

    #[test]
    fn only_backends_holding_the_file_are_candidates() {
        let pool = pool(&[0, 1], 0);
        let table = WorkloadTable::new();
        let _busy = table.acquire(0);
        assert_eq!(pool.choose(&table, &locators(&[0, 5]), None, &[]), Some(0));
        assert_eq!(pool.choose(&table, &locators(&[0]), None, &[0]), None);
    }

    #[test]
    fn snapshot_lists_used_backends() {
        let table = WorkloadTable::new();
        let _a = table.acquire(3);
        drop(table.acquire(1));
        let snap = table.snapshot();
        assert_eq!(snap.get(&3), Some(&1));
        assert_eq!(snap.get(&1), Some(&0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_balance_to_zero() {
        let table = Arc::new(WorkloadTable::new());
        let handles: Vec<_> = (0..64)
            .map(|i| {
                let table = Arc::clone(&table);
                tokio::spawn(async move {
                    let _slot = table.acquire(i % 2);
                    tokio::task::yield_now().await;
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(table.active(0), 0);
        assert_eq!(table.active(1), 0);
    }
}
