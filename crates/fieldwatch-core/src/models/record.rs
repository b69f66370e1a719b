//! Shared sync metadata for domain records

use rusqlite::types::Value;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a domain record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Kinds of domain records that take part in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Farm/property
    Fazenda,
    /// Field/plot inside a fazenda
    Talhao,
    /// Geolocated field inspection
    Scout,
    /// Pest observation
    Praga,
    /// Field activity (spraying, planting, ...)
    Activity,
}

impl EntityType {
    /// Every entity type, in dependency order (parents first).
    pub const ALL: [Self; 5] = [
        Self::Fazenda,
        Self::Talhao,
        Self::Scout,
        Self::Praga,
        Self::Activity,
    ];

    /// Stable name used in the queue tables and on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fazenda => "fazenda",
            Self::Talhao => "talhao",
            Self::Scout => "scout",
            Self::Praga => "praga",
            Self::Activity => "activity",
        }
    }

    /// Local table holding records of this type
    pub const fn table(self) -> &'static str {
        match self {
            Self::Fazenda => "fazendas",
            Self::Talhao => "talhoes",
            Self::Scout => "scouts",
            Self::Praga => "pragas",
            Self::Activity => "activities",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fazenda" | "fazendas" => Ok(Self::Fazenda),
            "talhao" | "talhão" | "talhoes" => Ok(Self::Talhao),
            "scout" | "scouts" => Ok(Self::Scout),
            "praga" | "pragas" => Ok(Self::Praga),
            "activity" | "activities" => Ok(Self::Activity),
            other => Err(Error::InvalidInput(format!("unknown entity type '{other}'"))),
        }
    }
}

/// Sync bookkeeping carried by every domain record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordMeta {
    /// Unique identifier
    pub id: RecordId,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// True once every queued mutation for the record was acknowledged
    pub synced: bool,
    /// Soft delete timestamp (Unix ms)
    pub deleted_at: Option<i64>,
    /// Identifier assigned by the backend, when it returned one
    pub remote_id: Option<String>,
}

impl RecordMeta {
    /// Fresh metadata for a record created now
    #[must_use]
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: RecordId::new(),
            created_at: now,
            updated_at: now,
            synced: false,
            deleted_at: None,
            remote_id: None,
        }
    }

    /// Whether the record is soft-deleted
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get(0)?;
        let id = id.parse().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(error))
        })?;
        Ok(Self {
            id,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            synced: row.get::<_, i32>(3)? != 0,
            deleted_at: row.get(4)?,
            remote_id: row.get(5)?,
        })
    }
}

impl Default for RecordMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Columns shared by every domain table, in select order.
pub(crate) const META_COLUMNS: [&str; 6] = [
    "id",
    "created_at",
    "updated_at",
    "synced",
    "deleted_at",
    "remote_id",
];

/// A domain record with a static column mapping.
///
/// Business columns are listed in [`SyncRecord::COLUMNS`] and produced by
/// [`SyncRecord::column_values`] in the same order; rows are read back with
/// [`SyncRecord::from_row`], where business columns start at index
/// `META_COLUMNS.len()`.
pub trait SyncRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity type tag
    const ENTITY_TYPE: EntityType;

    /// Business column names
    const COLUMNS: &'static [&'static str];

    /// Sync metadata
    fn meta(&self) -> &RecordMeta;

    /// Mutable sync metadata
    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Business column values, ordered like [`SyncRecord::COLUMNS`]
    fn column_values(&self) -> Vec<Value>;

    /// Build a record from metadata and the business columns of a row
    fn from_row(meta: RecordMeta, row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Reject records the backend would refuse anyway
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Record id
    fn id(&self) -> RecordId {
        self.meta().id
    }

    /// Snapshot sent to the backend, without local-only flags
    fn payload(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.remove("synced");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_parse_roundtrip() {
        let id = RecordId::new();
        let parsed: RecordId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn record_ids_are_time_sortable() {
        let first = RecordId::new();
        let second = RecordId::new();
        assert!(first < second);
    }

    #[test]
    fn entity_type_parses_plural_and_accented_names() {
        assert_eq!("talhão".parse::<EntityType>().unwrap(), EntityType::Talhao);
        assert_eq!("Scouts".parse::<EntityType>().unwrap(), EntityType::Scout);
        assert!("tractor".parse::<EntityType>().is_err());
    }

    #[test]
    fn meta_defaults_are_unsynced_and_live() {
        let meta = RecordMeta::new();
        assert!(!meta.synced);
        assert!(!meta.is_deleted());
        assert_eq!(meta.created_at, meta.updated_at);
    }
}
