//! Sync bookkeeping repository implementation

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

const LAST_SYNC_AT: &str = "last_sync_at";

/// Trait for sync bookkeeping storage operations
pub trait SyncMetaRepository {
    /// Time of the last completed drain cycle (Unix ms)
    fn last_sync_at(&self) -> Result<Option<i64>>;

    /// Record a completed drain cycle
    fn set_last_sync_at(&self, at: i64) -> Result<()>;
}

/// `SQLite` implementation of `SyncMetaRepository`
pub struct SqliteSyncMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get a single value by key
    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a single value
    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl SyncMetaRepository for SqliteSyncMetaRepository<'_> {
    fn last_sync_at(&self) -> Result<Option<i64>> {
        Ok(self
            .get_value(LAST_SYNC_AT)?
            .and_then(|value| value.parse().ok()))
    }

    fn set_last_sync_at(&self, at: i64) -> Result<()> {
        self.set_value(LAST_SYNC_AT, &at.to_string())
    }
}
