use async_trait::async_trait;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};

/// Result of a compare-and-swap operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The swap succeeded and the new version is stored.
    Ok,
    /// The swap failed because the current version didn't match.
    Conflict {
        current_value: Option<String>,
        current_version: u64,
    },
}

/// Persistence contract used by the gateway.
///
/// One implementation exists per storage engine; callers hold an
/// `Arc<dyn StateStore>` and never branch on the engine. Implementations
/// must be `Send + Sync` and safe for concurrent access.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Check if a key exists; if not, set it atomically.
    /// Returns `true` if the key was newly set, `false` if it already existed.
    async fn check_and_set(&self, key: &StateKey, value: &str) -> Result<bool, StateError>;

    /// Get the value for a key. Returns `None` if not found.
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Get the value together with its version, for a later
    /// [`compare_and_swap`](Self::compare_and_swap).
    async fn get_versioned(&self, key: &StateKey) -> Result<Option<(String, u64)>, StateError>;

    /// Set a value, overwriting any previous value.
    async fn set(&self, key: &StateKey, value: &str) -> Result<(), StateError>;

    /// Atomically increment a counter by `delta`. Returns the new value.
    /// Creates the counter at 0 if it doesn't exist before incrementing.
    async fn increment(&self, key: &StateKey, delta: i64) -> Result<i64, StateError>;

    /// Compare-and-swap: update value only if the current version matches.
    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
    ) -> Result<CasResult, StateError>;

    /// Scan keys of `kind` in `namespace`.
    ///
    /// Returns `(canonical key, value)` pairs. When `prefix` is set only ids
    /// starting with it are returned. This operation may be expensive on some
    /// backends. Use sparingly.
    async fn scan_keys(
        &self,
        namespace: &str,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError>;

    /// Append a value to the log stored under `key`.
    async fn append(&self, key: &StateKey, value: &str) -> Result<(), StateError>;

    /// Read up to `limit` entries of the log under `key`, newest first.
    async fn read_log(&self, key: &StateKey, limit: usize) -> Result<Vec<String>, StateError>;
}
