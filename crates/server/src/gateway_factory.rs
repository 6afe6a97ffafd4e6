use std::sync::Arc;
use std::time::Duration;

use chunkgate_crypto::LinkCodec;
use chunkgate_gateway::{Gateway, GatewayBuilder};
use chunkgate_source::{ChunkSource, HttpChunkSource};
use chunkgate_state::StateStore;
use tracing::info;

use crate::config::{BackendConfig, ChunkgateConfig, LINK_SECRET_ENV};
use crate::error::ServerError;

/// Create the chunk source for one configured backend.
pub fn create_source(config: &BackendConfig) -> Result<Arc<dyn ChunkSource>, ServerError> {
    match config.kind.as_str() {
        "http" => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                ServerError::Config(format!("backend {} requires base_url", config.index))
            })?;
            let source = HttpChunkSource::new(
                config.display_name(),
                base_url,
                Duration::from_secs(config.timeout_seconds),
            )
            .map_err(|e| ServerError::Config(format!("backend {}: {e}", config.index)))?;
            Ok(Arc::new(source))
        }
        other => Err(ServerError::Config(format!(
            "backend {} has unknown kind {other:?}",
            config.index
        ))),
    }
}

/// Validate `config` and assemble the gateway on top of `state`.
pub fn build_gateway(
    config: &ChunkgateConfig,
    state: Arc<dyn StateStore>,
) -> Result<Gateway, ServerError> {
    config.validate()?;

    let secret = config.links.resolve_secret().ok_or_else(|| {
        ServerError::Config(format!(
            "a link secret is required: set [links] secret or {LINK_SECRET_ENV}"
        ))
    })?;
    let codec = LinkCodec::new(secret).map_err(|e| ServerError::Config(e.to_string()))?;

    let mut builder = GatewayBuilder::new()
        .state(state)
        .codec(codec)
        .rate_limits(config.rate_limit.limits())
        .chunk_size(config.streaming.chunk_size)
        .namespace(config.state.namespace.as_str())
        .default_ttl_seconds(config.links.default_ttl_seconds);

    if let Some(tz) = config.rate_limit.parse_timezone().map_err(ServerError::Config)? {
        builder = builder.timezone(tz);
    }
    if let Some(primary) = config.primary_backend {
        builder = builder.primary_backend(primary);
    }
    for backend in &config.backends {
        let source = create_source(backend)?;
        info!(
            index = backend.index,
            name = %backend.display_name(),
            kind = %backend.kind,
            "backend configured"
        );
        builder = builder.backend(backend.index, source);
    }

    Ok(builder.build()?)
}
