use chunkgate_core::BackendIndex;
use serde::Deserialize;

/// One storage backend holding file content.
///
/// # Example
///
/// ```toml
/// [[backends]]
/// index = 0
/// kind = "http"
/// base_url = "http://origin-a.internal/files"
/// name = "origin-a"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Index referenced by file locators and the `?backend=` parameter.
    pub index: BackendIndex,
    /// Backend type. Only `"http"` is supported.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Base URL; a locator is appended as the last path segment.
    pub base_url: Option<String>,
    /// Display name used in logs. Defaults to `backend-{index}`.
    pub name: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl BackendConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("backend-{}", self.index))
    }
}

fn default_kind() -> String {
    "http".to_owned()
}

fn default_timeout() -> u64 {
    30
}
