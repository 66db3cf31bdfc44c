//! Table layout, following the same `CREATE TABLE IF NOT EXISTS` +
//! `ALTER TABLE ... ADD COLUMN IF NOT EXISTS` migration style that runs
//! against `tasks`/`events` at startup elsewhere in this codebase instead
//! of a migration framework.
//!
//! Every collection is a thin `(key, version, data jsonb)` table: `data`
//! holds the full serialized domain type, `version` backs the
//! compare-and-set loop in `PgStore::with_*`. Keeping the documents as
//! JSONB rather than exploding every `Analysis` field into a column avoids
//! a migration every time a module adds a new result shape — the same
//! reason `remnux_report` is stored as `JSONB` rather than as typed
//! columns.

pub const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
        id UUID PRIMARY KEY,
        sha256 TEXT,
        version BIGINT NOT NULL DEFAULT 0,
        data JSONB NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_files_sha256 ON files (sha256)",
    "CREATE TABLE IF NOT EXISTS analyses (
        id UUID PRIMARY KEY,
        version BIGINT NOT NULL DEFAULT 0,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS modules (
        name TEXT PRIMARY KEY,
        version BIGINT NOT NULL DEFAULT 0,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS settings (
        name TEXT PRIMARY KEY,
        version BIGINT NOT NULL DEFAULT 0,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS internals (
        name TEXT PRIMARY KEY,
        version BIGINT NOT NULL DEFAULT 0,
        data JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS queue_tasks (
        id BIGSERIAL PRIMARY KEY,
        queue TEXT NOT NULL,
        analysis_id UUID NOT NULL,
        module_name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        claimed_by TEXT,
        claimed_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ
    )",
    "CREATE INDEX IF NOT EXISTS idx_queue_tasks_unclaimed ON queue_tasks (queue) WHERE claimed_at IS NULL",
];

pub async fn init(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    for stmt in CREATE_TABLES {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
