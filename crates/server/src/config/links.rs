use chunkgate_crypto::{ExposeSecret, SecretString};
use chunkgate_gateway::DEFAULT_LINK_TTL_SECONDS;
use serde::Deserialize;

/// Environment variable consulted when `[links] secret` is not set.
pub const LINK_SECRET_ENV: &str = "CHUNKGATE_LINK_SECRET";

/// Signed link configuration.
#[derive(Debug, Deserialize)]
pub struct LinksConfig {
    /// Shared secret mixed into every integrity tag.
    ///
    /// Falls back to the `CHUNKGATE_LINK_SECRET` environment variable.
    /// Rotating it invalidates every outstanding link.
    pub secret: Option<SecretString>,
    /// Lifetime of issued links in seconds.
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            secret: None,
            default_ttl_seconds: default_ttl(),
        }
    }
}

impl LinksConfig {
    /// The configured secret, else the environment variable. Empty values
    /// count as missing.
    pub fn resolve_secret(&self) -> Option<SecretString> {
        self.secret
            .as_ref()
            .map(|s| s.expose_secret().clone())
            .or_else(|| std::env::var(LINK_SECRET_ENV).ok())
            .filter(|s| !s.is_empty())
            .map(SecretString::new)
    }
}

fn default_ttl() -> u64 {
    DEFAULT_LINK_TTL_SECONDS
}
