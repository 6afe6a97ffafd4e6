use std::sync::Arc;

use chunkgate_core::AccessLogEntry;
use chunkgate_state::{KeyKind, StateError, StateKey, StateStore};

use crate::error::GatewayError;

/// Append-only access log, one log per resource.
#[derive(Clone)]
pub struct AccessLog {
    state: Arc<dyn StateStore>,
    namespace: String,
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl AccessLog {
    pub fn new(state: Arc<dyn StateStore>, namespace: impl Into<String>) -> Self {
        Self {
            state,
            namespace: namespace.into(),
        }
    }

    fn key(&self, resource_id: &str) -> StateKey {
        StateKey::new(self.namespace.as_str(), KeyKind::AccessLog, resource_id)
    }

    pub async fn append(&self, entry: &AccessLogEntry) -> Result<(), GatewayError> {
        let json = serde_json::to_string(entry).map_err(StateError::from)?;
        self.state.append(&self.key(&entry.resource_id), &json).await?;
        Ok(())
    }

    /// Up to `limit` entries for `resource_id`, newest first.
    pub async fn recent(
        &self,
        resource_id: &str,
        limit: usize,
    ) -> Result<Vec<AccessLogEntry>, GatewayError> {
        let raw = self.state.read_log(&self.key(resource_id), limit).await?;
        raw.iter()
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| GatewayError::State(StateError::from(e)))
            })
            .collect()
    }
}
