use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use chunkgate_state::error::StateError;
use chunkgate_state::key::{KeyKind, StateKey};
use chunkgate_state::store::{CasResult, StateStore};

use crate::config::PostgresConfig;
use crate::migrations;

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
pub(crate) fn build_connect_options(
    config: &PostgresConfig,
) -> Result<sqlx::postgres::PgConnectOptions, StateError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| StateError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => {
                return Err(StateError::Connection(format!("unknown ssl_mode: {other}")));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    if let Some(ref path) = config.ssl_cert {
        options = options.ssl_client_cert(path);
    }

    if let Some(ref path) = config.ssl_key {
        options = options.ssl_client_key(path);
    }

    Ok(options)
}

/// Escape `LIKE` wildcards so user-supplied prefixes match literally.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn backend_err(e: sqlx::Error) -> StateError {
    StateError::Backend(e.to_string())
}

/// PostgreSQL-backed implementation of [`StateStore`].
///
/// Uses `sqlx::PgPool` for connection pooling. Counters are stored as text
/// values and updated in place by an upsert. Logs live in a separate table
/// ordered by a `BIGSERIAL` sequence.
pub struct PostgresStateStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresStateStore {
    /// Create a new `PostgresStateStore` from the provided configuration.
    ///
    /// Connects to `PostgreSQL`, creates the connection pool, and runs
    /// migrations to ensure the required tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if pool creation fails, or
    /// [`StateError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StateError> {
        let connect_options = build_connect_options(&config)?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(connect_options)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a `PostgresStateStore` from an existing pool and config.
    ///
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StateError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(backend_err)?;
        debug!(table = %config.state_table(), "postgres state store ready");

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn check_and_set(&self, key: &StateKey, value: &str) -> Result<bool, StateError> {
        let table = self.config.state_table();

        // The primary key makes exactly one concurrent INSERT succeed.
        let query = format!(
            "INSERT INTO {table} (key, value, version) \
             VALUES ($1, $2, 1) \
             ON CONFLICT (key) DO NOTHING"
        );

        let result = sqlx::query(&query)
            .bind(key.canonical())
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        Ok(self.get_versioned(key).await?.map(|(value, _)| value))
    }

    async fn get_versioned(&self, key: &StateKey) -> Result<Option<(String, u64)>, StateError> {
        let canonical = key.canonical();
        let table = self.config.state_table();

        let query = format!(
            "SELECT value, version FROM {table} WHERE key = $1"
        );

        let row: Option<(String, i64)> = sqlx::query_as(&query)
            .bind(&canonical)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(row.map(|(v, version)| (v, u64::try_from(version).unwrap_or(0))))
    }

    async fn set(&self, key: &StateKey, value: &str) -> Result<(), StateError> {
        let table = self.config.state_table();

        let query = format!(
            "INSERT INTO {table} (key, value, version) \
             VALUES ($1, $2, 1) \
             ON CONFLICT (key) DO UPDATE \
             SET value = EXCLUDED.value, \
                 version = {table}.version + 1"
        );

        sqlx::query(&query)
            .bind(key.canonical())
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(())
    }

    async fn increment(&self, key: &StateKey, delta: i64) -> Result<i64, StateError> {
        let table = self.config.state_table();

        // Upsert: insert with delta as the initial value, or update by adding delta.
        let query = format!(
            "INSERT INTO {table} (key, value, version) \
             VALUES ($1, $2::text, 1) \
             ON CONFLICT (key) DO UPDATE \
             SET value = ({table}.value::bigint + $2)::text, \
                 version = {table}.version + 1 \
             RETURNING value"
        );

        let row: (String,) = sqlx::query_as(&query)
            .bind(key.canonical())
            .bind(delta)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;

        row.0
            .parse::<i64>()
            .map_err(|e| StateError::Serialization(e.to_string()))
    }

    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
    ) -> Result<CasResult, StateError> {
        let canonical = key.canonical();
        let table = self.config.state_table();
        let expected_version = i64::try_from(expected_version).unwrap_or(i64::MAX);

        // Single conditional update: succeeds only if the version still matches.
        let update_query = format!(
            "UPDATE {table} \
             SET value = $1, version = version + 1 \
             WHERE key = $2 AND version = $3"
        );

        let result = sqlx::query(&update_query)
            .bind(new_value)
            .bind(&canonical)
            .bind(expected_version)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        if result.rows_affected() > 0 {
            return Ok(CasResult::Ok);
        }

        match self.get_versioned(key).await? {
            Some((value, version)) => Ok(CasResult::Conflict {
                current_value: Some(value),
                current_version: version,
            }),
            None => Ok(CasResult::Conflict {
                current_value: None,
                current_version: 0,
            }),
        }
    }

    async fn scan_keys(
        &self,
        namespace: &str,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError> {
        let table = self.config.state_table();
        let mut key_prefix = escape_like(&StateKey::kind_prefix(namespace, &kind));
        if let Some(p) = prefix {
            key_prefix.push_str(&escape_like(p));
        }
        key_prefix.push('%');

        let query = format!(
            "SELECT key, value FROM {table} \
             WHERE key LIKE $1 ESCAPE '\\'"
        );

        let rows: Vec<(String, String)> = sqlx::query_as(&query)
            .bind(&key_prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(rows)
    }

    async fn append(&self, key: &StateKey, value: &str) -> Result<(), StateError> {
        let table = self.config.log_table();
        let query = format!("INSERT INTO {table} (key, value) VALUES ($1, $2)");

        sqlx::query(&query)
            .bind(key.canonical())
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(())
    }

    async fn read_log(&self, key: &StateKey, limit: usize) -> Result<Vec<String>, StateError> {
        let table = self.config.log_table();
        let query =
            format!("SELECT value FROM {table} WHERE key = $1 ORDER BY seq DESC LIMIT $2");

        let rows: Vec<(String,)> = sqlx::query_as(&query)
            .bind(key.canonical())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(rows.into_iter().map(|(v,)| v).collect())
    }
}
