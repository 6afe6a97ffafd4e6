use std::sync::Arc;

use chrono_tz::Tz;
use tokio_util::task::TaskTracker;

use chunkgate_core::BackendIndex;
use chunkgate_crypto::LinkCodec;
use chunkgate_source::ChunkSource;
use chunkgate_state::StateStore;

use crate::access_log::AccessLog;
use crate::balancer::{BackendPool, WorkloadTable};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::limiter::{RateLimiter, RateLimits};
use crate::links::LinkLedger;
use crate::metrics::GatewayMetrics;
use crate::registry::FileRegistry;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1_048_576;

/// Default link lifetime: seven days.
pub const DEFAULT_LINK_TTL_SECONDS: u64 = 604_800;

/// Default state-store namespace.
pub const DEFAULT_NAMESPACE: &str = "chunkgate";

/// Fluent builder for constructing a [`Gateway`] instance.
///
/// A [`StateStore`], a [`LinkCodec`] and at least one backend must be
/// supplied. Everything else has defaults: 1 MiB chunks, seven-day links,
/// 1/5/20 links per 5 minutes/hour/day, and the lowest backend index as
/// primary.
pub struct GatewayBuilder {
    state: Option<Arc<dyn StateStore>>,
    codec: Option<LinkCodec>,
    backends: Vec<(BackendIndex, Arc<dyn ChunkSource>)>,
    primary: Option<BackendIndex>,
    workload: Option<Arc<WorkloadTable>>,
    limits: RateLimits,
    timezone: Option<Tz>,
    chunk_size: u64,
    namespace: String,
    default_ttl_seconds: u64,
}

impl GatewayBuilder {
    /// Create a new builder with all optional fields set to their defaults.
    pub fn new() -> Self {
        Self {
            state: None,
            codec: None,
            backends: Vec::new(),
            primary: None,
            workload: None,
            limits: RateLimits::default(),
            timezone: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            default_ttl_seconds: DEFAULT_LINK_TTL_SECONDS,
        }
    }

    /// Set the state store implementation.
    #[must_use]
    pub fn state(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = Some(store);
        self
    }

    /// Set the codec used to sign and verify links.
    #[must_use]
    pub fn codec(mut self, codec: LinkCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Register a backend under `index`.
    #[must_use]
    pub fn backend(mut self, index: BackendIndex, source: Arc<dyn ChunkSource>) -> Self {
        self.backends.push((index, source));
        self
    }

    /// Set the backend used when a pinned backend cannot serve a request.
    #[must_use]
    pub fn primary_backend(mut self, index: BackendIndex) -> Self {
        self.primary = Some(index);
        self
    }

    /// Share a workload table with other components (e.g. health reporting).
    #[must_use]
    pub fn workload(mut self, workload: Arc<WorkloadTable>) -> Self {
        self.workload = Some(workload);
        self
    }

    #[must_use]
    pub fn rate_limits(mut self, limits: RateLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Time zone whose midnight starts the daily rate-limit window. The host's
    /// local zone is used when unset.
    #[must_use]
    pub fn timezone(mut self, tz: Tz) -> Self {
        self.timezone = Some(tz);
        self
    }

    /// Size of each backend chunk fetch, in bytes.
    #[must_use]
    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Namespace prefixing every state-store key.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Lifetime of issued links when the caller does not pick one.
    #[must_use]
    pub fn default_ttl_seconds(mut self, seconds: u64) -> Self {
        self.default_ttl_seconds = seconds;
        self
    }

    /// Consume the builder and produce a configured [`Gateway`].
    ///
    /// Returns a [`GatewayError::Configuration`] if required fields are
    /// missing or the settings are inconsistent.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let state = self
            .state
            .ok_or_else(|| GatewayError::Configuration("state store is required".into()))?;

        let codec = self
            .codec
            .ok_or_else(|| GatewayError::Configuration("link codec is required".into()))?;

        if self.backends.is_empty() {
            return Err(GatewayError::Configuration(
                "at least one backend is required".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(GatewayError::Configuration(
                "chunk size must be greater than zero".into(),
            ));
        }

        let lowest = self.backends.iter().map(|(i, _)| *i).min().unwrap_or_default();
        let primary = self.primary.unwrap_or(lowest);
        let mut pool = BackendPool::new(primary);
        for (index, source) in self.backends {
            pool.insert(index, source);
        }
        if !pool.contains(primary) {
            return Err(GatewayError::Configuration(format!(
                "primary backend {primary} is not configured"
            )));
        }

        Ok(Gateway {
            codec,
            registry: FileRegistry::new(Arc::clone(&state), self.namespace.as_str()),
            ledger: LinkLedger::new(Arc::clone(&state), self.namespace.as_str()),
            access_log: AccessLog::new(Arc::clone(&state), self.namespace.as_str()),
            limiter: RateLimiter::new(
                Arc::clone(&state),
                self.namespace.as_str(),
                self.limits,
                self.timezone,
            ),
            pool,
            workload: self.workload.unwrap_or_default(),
            state,
            chunk_size: self.chunk_size,
            default_ttl_seconds: self.default_ttl_seconds,
            metrics: Arc::new(GatewayMetrics::default()),
            side_effects: TaskTracker::new(),
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
