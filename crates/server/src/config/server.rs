use chunkgate_crypto::SecretString;
use serde::Deserialize;

/// HTTP server bind configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Graceful shutdown timeout in seconds.
    ///
    /// Upper bound on the wait for in-flight counter and access-log writes
    /// once the listener has stopped.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Public base URL used to build full link URLs (e.g.
    /// `https://files.example.com`).
    ///
    /// If not set, defaults to `http://localhost:{port}`.
    pub external_url: Option<String>,
    /// Bearer token guarding the `/v1` administration routes.
    ///
    /// When absent the administration routes are not mounted.
    pub admin_token: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            external_url: None,
            admin_token: None,
        }
    }
}

impl ServerConfig {
    /// Base URL prepended to link paths, without a trailing slash.
    pub fn base_url(&self) -> String {
        self.external_url.as_deref().map_or_else(
            || format!("http://localhost:{}", self.port),
            |url| url.trim_end_matches('/').to_owned(),
        )
    }
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}
