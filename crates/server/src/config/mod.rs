mod backends;
mod links;
mod rate_limit;
mod server;
mod state;
mod streaming;
mod telemetry;


pub use backends::*;
pub use links::*;
pub use rate_limit::*;
pub use server::*;
pub use state::*;
pub use streaming::*;
pub use telemetry::*;

use std::collections::BTreeSet;
use std::path::Path;

use chunkgate_core::BackendIndex;
use serde::Deserialize;

use crate::error::ServerError;

/// Top-level configuration for the chunkgate server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkgateConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Link signing configuration.
    #[serde(default)]
    pub links: LinksConfig,
    /// Link issuance limits.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Storage backends, addressed by index.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// Backend used when a pinned backend cannot serve a file.
    ///
    /// Defaults to the lowest configured index.
    pub primary_backend: Option<BackendIndex>,
    /// OpenTelemetry distributed tracing configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ChunkgateConfig {
    /// Parse a configuration document.
    pub fn from_toml(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Load the file at `path`, or the defaults when it does not exist.
    ///
    /// The boolean is `true` when the file was found.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, bool), ServerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok((Self::from_toml("")?, false));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok((Self::from_toml(&contents)?, true))
    }

    /// Check the settings that can be checked without connecting anywhere.
    ///
    /// The link secret is checked separately by
    /// [`LinksConfig::resolve_secret`] because it may come from the
    /// environment.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.streaming.chunk_size == 0 {
            return Err(ServerError::Config(
                "streaming.chunk_size must be greater than zero".into(),
            ));
        }
        if self.links.default_ttl_seconds == 0 {
            return Err(ServerError::Config(
                "links.default_ttl_seconds must be greater than zero".into(),
            ));
        }
        self.rate_limit.parse_timezone().map_err(ServerError::Config)?;

        if self.backends.is_empty() {
            return Err(ServerError::Config(
                "at least one [[backends]] entry is required".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.index) {
                return Err(ServerError::Config(format!(
                    "backend index {} is configured twice",
                    backend.index
                )));
            }
            match backend.kind.as_str() {
                "http" => {
                    if backend.base_url.as_deref().is_none_or(str::is_empty) {
                        return Err(ServerError::Config(format!(
                            "backend {} of kind \"http\" requires base_url",
                            backend.index
                        )));
                    }
                }
                other => {
                    return Err(ServerError::Config(format!(
                        "backend {} has unknown kind {other:?}",
                        backend.index
                    )));
                }
            }
        }
        if let Some(primary) = self.primary_backend
            && !seen.contains(&primary)
        {
            return Err(ServerError::Config(format!(
                "primary_backend {primary} is not configured"
            )));
        }

        match self.state.backend.as_str() {
            "memory" | "postgres" => Ok(()),
            other => Err(ServerError::Config(format!(
                "unknown state backend {other:?}"
            ))),
        }
    }
}
