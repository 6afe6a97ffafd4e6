use std::sync::Arc;

use chunkgate_state::StateStore;
use chunkgate_state_memory::MemoryStateStore;
use tracing::info;

use crate::config::StateConfig;
use crate::error::ServerError;

/// Create the state store selected by `config`.
///
/// For `PostgreSQL` this connects and runs the schema migrations, which is
/// also all the `migrate` subcommand needs.
pub async fn create_state(config: &StateConfig) -> Result<Arc<dyn StateStore>, ServerError> {
    match config.backend.as_str() {
        "memory" => {
            info!("using in-memory state store");
            Ok(Arc::new(MemoryStateStore::new()))
        }
        "postgres" => create_postgres(config).await,
        other => Err(ServerError::Config(format!("unknown state backend {other:?}"))),
    }
}

#[cfg(feature = "postgres")]
async fn create_postgres(config: &StateConfig) -> Result<Arc<dyn StateStore>, ServerError> {
    use chunkgate_state_postgres::{PostgresConfig, PostgresStateStore};

    let url = config
        .url
        .clone()
        .ok_or_else(|| ServerError::Config("state.url is required for postgres".into()))?;
    let defaults = PostgresConfig::default();
    let pg_config = PostgresConfig {
        url,
        pool_size: config.pool_size.unwrap_or(defaults.pool_size),
        schema: config.schema.clone().unwrap_or(defaults.schema),
        table_prefix: config.table_prefix.clone().unwrap_or(defaults.table_prefix),
        ssl_mode: config.ssl_mode.clone(),
        ..PostgresConfig::default()
    };
    let store = PostgresStateStore::new(pg_config).await?;
    info!("using postgres state store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
async fn create_postgres(_config: &StateConfig) -> Result<Arc<dyn StateStore>, ServerError> {
    Err(ServerError::Config(
        "postgres state backend requires the `postgres` feature".into(),
    ))
}
