use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating required tables if they do not exist.
///
/// Creates the keyed state table and the append-only log table in the
/// configured schema with the configured table prefix.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let state_table = config.state_table();
    let log_table = config.log_table();

    let create_state = format!(
        "CREATE TABLE IF NOT EXISTS {state_table} (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            version BIGINT NOT NULL DEFAULT 1
        )"
    );

    let create_log = format!(
        "CREATE TABLE IF NOT EXISTS {log_table} (
            seq BIGSERIAL PRIMARY KEY,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    );

    // Reads are always "newest N entries for one key".
    let create_log_idx = format!(
        "CREATE INDEX IF NOT EXISTS {}log_key_seq_idx ON {log_table} (key, seq DESC)",
        config.table_prefix
    );

    sqlx::query(&create_state).execute(pool).await?;
    sqlx::query(&create_log).execute(pool).await?;
    sqlx::query(&create_log_idx).execute(pool).await?;

    Ok(())
}
