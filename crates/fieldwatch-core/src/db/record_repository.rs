//! Domain record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use std::marker::PhantomData;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::error::{Error, Result};
use crate::models::{EntityType, RecordId, RecordMeta, SyncRecord, META_COLUMNS};

/// Trait for domain record storage operations
pub trait RecordRepository<T: SyncRecord> {
    /// Insert a new record
    fn insert(&self, record: &T) -> Result<()>;

    /// Overwrite the business fields of an existing record
    fn update(&self, record: &T) -> Result<()>;

    /// Soft delete a record; returns the tombstoned record
    fn soft_delete(&self, id: &RecordId) -> Result<T>;

    /// Get a live record by ID
    fn get(&self, id: &RecordId) -> Result<Option<T>>;

    /// List live records, most recently updated first
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<T>>;

    /// Mark a record as acknowledged by the backend
    fn mark_synced(&self, id: &RecordId, remote_id: Option<&str>) -> Result<bool>;
}

/// `SQLite` implementation of `RecordRepository` for any [`SyncRecord`]
pub struct SqliteRecordRepository<'a, T> {
    conn: &'a Connection,
    _record: PhantomData<T>,
}

impl<'a, T: SyncRecord> SqliteRecordRepository<'a, T> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            _record: PhantomData,
        }
    }

    fn table() -> &'static str {
        T::ENTITY_TYPE.table()
    }

    fn select_columns() -> String {
        META_COLUMNS
            .iter()
            .chain(T::COLUMNS.iter())
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
        let meta = RecordMeta::from_row(row)?;
        T::from_row(meta, row)
    }

    fn meta_values(meta: &RecordMeta) -> Vec<Value> {
        vec![
            Value::Text(meta.id.as_str()),
            Value::Integer(meta.created_at),
            Value::Integer(meta.updated_at),
            Value::Integer(i64::from(meta.synced)),
            meta.deleted_at.map_or(Value::Null, Value::Integer),
            meta.remote_id.clone().map_or(Value::Null, Value::Text),
        ]
    }
}

impl<T: SyncRecord> RecordRepository<T> for SqliteRecordRepository<'_, T> {
    fn insert(&self, record: &T) -> Result<()> {
        record.validate()?;

        let columns = Self::select_columns();
        let placeholders = vec!["?"; META_COLUMNS.len() + T::COLUMNS.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            Self::table()
        );

        let mut values = Self::meta_values(record.meta());
        values.extend(record.column_values());
        self.conn.execute(&sql, params_from_iter(values))?;

        Ok(())
    }

    fn update(&self, record: &T) -> Result<()> {
        record.validate()?;

        let assignments = T::COLUMNS
            .iter()
            .map(|column| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments}, updated_at = ?, synced = 0
             WHERE id = ? AND deleted_at IS NULL",
            Self::table()
        );

        let mut values = record.column_values();
        values.push(Value::Integer(record.meta().updated_at));
        values.push(Value::Text(record.id().as_str()));

        let rows = self.conn.execute(&sql, params_from_iter(values))?;
        if rows == 0 {
            return Err(Error::NotFound(format!(
                "{} {}",
                T::ENTITY_TYPE,
                record.id()
            )));
        }

        Ok(())
    }

    fn soft_delete(&self, id: &RecordId) -> Result<T> {
        let record = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", T::ENTITY_TYPE)))?;

        let now = chrono::Utc::now().timestamp_millis();
        self.conn.execute(
            &format!(
                "UPDATE {} SET deleted_at = ?, updated_at = ?, synced = 0 WHERE id = ?",
                Self::table()
            ),
            params![now, now, id.as_str()],
        )?;

        let mut deleted = record;
        let meta = deleted.meta_mut();
        meta.deleted_at = Some(now);
        meta.updated_at = now;
        meta.synced = false;
        Ok(deleted)
    }

    fn get(&self, id: &RecordId) -> Result<Option<T>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ? AND deleted_at IS NULL",
            Self::select_columns(),
            Self::table()
        );
        let result = self
            .conn
            .query_row(&sql, params![id.as_str()], Self::parse_record);

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<T>> {
        let sql = format!(
            "SELECT {} FROM {}
             WHERE deleted_at IS NULL
             ORDER BY updated_at DESC, id DESC
             LIMIT ? OFFSET ?",
            Self::select_columns(),
            Self::table()
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let records = stmt
            .query_map(params![limit as i64, offset as i64], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn mark_synced(&self, id: &RecordId, remote_id: Option<&str>) -> Result<bool> {
        mark_entity_synced(self.conn, T::ENTITY_TYPE, &id.as_str(), remote_id)
    }
}

/// Set `synced = 1` (and the backend id, when given) on any domain record.
///
/// Soft-deleted rows are updated too; a missing row is reported as `false`.
pub fn mark_entity_synced(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    remote_id: Option<&str>,
) -> Result<bool> {
    let rows = conn.execute(
        &format!(
            "UPDATE {} SET synced = 1, remote_id = COALESCE(?, remote_id) WHERE id = ?",
            entity_type.table()
        ),
        params![remote_id, entity_id],
    )?;
    Ok(rows > 0)
}

/// Store the backend id without touching the synced flag.
pub fn set_entity_remote_id(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    remote_id: &str,
) -> Result<()> {
    conn.execute(
        &format!("UPDATE {} SET remote_id = ? WHERE id = ?", entity_type.table()),
        params![remote_id, entity_id],
    )?;
    Ok(())
}

/// Read the synced flag of any domain record, including soft-deleted ones.
pub fn is_entity_synced(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Option<bool>> {
    let result = conn.query_row(
        &format!("SELECT synced FROM {} WHERE id = ?", entity_type.table()),
        params![entity_id],
        |row| row.get::<_, i32>(0),
    );

    match result {
        Ok(flag) => Ok(Some(flag != 0)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
