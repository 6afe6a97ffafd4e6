use chunkgate_gateway::DEFAULT_CHUNK_SIZE;
use serde::Deserialize;

/// Range streaming configuration.
#[derive(Debug, Deserialize)]
pub struct StreamingConfig {
    /// Size in bytes of every chunk fetched from a backend.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}
