//! Database migrations

use crate::error::{Error, Result};
use rusqlite::{params, Connection};

/// Current schema version
pub(crate) const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
///
/// A database written by a newer build is refused rather than half-read.
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::Database(format!(
            "schema version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }
    if version < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Apply one migration's statements and record its version atomically
fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        params![version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: domain tables
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS fazendas (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER,
                remote_id TEXT,
                name TEXT NOT NULL,
                owner_name TEXT,
                city TEXT
            )",
            "CREATE TABLE IF NOT EXISTS talhoes (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER,
                remote_id TEXT,
                fazenda_id TEXT NOT NULL,
                name TEXT NOT NULL,
                area_hectares REAL,
                crop TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_talhoes_fazenda ON talhoes(fazenda_id)",
            "CREATE TABLE IF NOT EXISTS scouts (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER,
                remote_id TEXT,
                talhao_id TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                observed_at INTEGER NOT NULL,
                notes TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_scouts_talhao ON scouts(talhao_id)",
            "CREATE TABLE IF NOT EXISTS pragas (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER,
                remote_id TEXT,
                scout_id TEXT NOT NULL,
                name TEXT NOT NULL,
                catalog_ref TEXT,
                quantity INTEGER NOT NULL DEFAULT 0,
                severity TEXT NOT NULL DEFAULT 'low'
            )",
            "CREATE INDEX IF NOT EXISTS idx_pragas_scout ON pragas(scout_id)",
            "CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER,
                remote_id TEXT,
                talhao_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                description TEXT,
                performed_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_activities_talhao ON activities(talhao_id)",
        ],
    )
}

/// Migration to version 2: mutation queue
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS mutation_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'processing', 'failed', 'synced')),
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 5,
                error_kind TEXT,
                error_message TEXT,
                next_retry_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CHECK (retry_count >= 0 AND retry_count <= max_retries)
            )",
            "CREATE INDEX IF NOT EXISTS idx_mutation_queue_entity
                ON mutation_queue(entity_type, entity_id, created_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_mutation_queue_status
                ON mutation_queue(status, next_retry_at)",
            // At most one in-flight entry per entity
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_mutation_queue_one_processing
                ON mutation_queue(entity_type, entity_id) WHERE status = 'processing'",
        ],
    )
}

/// Migration to version 3: recognition queue
fn migrate_v3(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        3,
        &[
            "CREATE TABLE IF NOT EXISTS recognition_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_path TEXT NOT NULL,
                metadata TEXT,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'processing', 'done', 'error')),
                attempts INTEGER NOT NULL DEFAULT 0,
                error_kind TEXT,
                error_message TEXT,
                result TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_recognition_queue_status
                ON recognition_queue(status, created_at)",
        ],
    )
}

/// Migration to version 4: sync bookkeeping (last successful drain, ...)
fn migrate_v4(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        4,
        &["CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"],
    )
}
