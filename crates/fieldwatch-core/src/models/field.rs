//! Field-monitoring domain records

use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::record::{EntityType, RecordId, RecordMeta, SyncRecord, META_COLUMNS};
use crate::error::{Error, Result};

const FIRST_COLUMN: usize = META_COLUMNS.len();

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn opt_text(value: Option<&String>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.clone()))
}

fn opt_real(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Real)
}

fn get_id(row: &Row<'_>, index: usize) -> rusqlite::Result<RecordId> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
    })
}

fn require_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::InvalidInput(format!("{field} cannot be empty")))
    } else {
        Ok(())
    }
}

/// A farm/property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fazenda {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl Fazenda {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            name: name.into(),
            owner_name: None,
            city: None,
        }
    }
}

impl SyncRecord for Fazenda {
    const ENTITY_TYPE: EntityType = EntityType::Fazenda;
    const COLUMNS: &'static [&'static str] = &["name", "owner_name", "city"];

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            opt_text(self.owner_name.as_ref()),
            opt_text(self.city.as_ref()),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            name: row.get(FIRST_COLUMN)?,
            owner_name: row.get(FIRST_COLUMN + 1)?,
            city: row.get(FIRST_COLUMN + 2)?,
        })
    }

    fn validate(&self) -> Result<()> {
        require_name("fazenda name", &self.name)
    }
}

/// A field/plot within a fazenda
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Talhao {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub fazenda_id: RecordId,
    pub name: String,
    #[serde(default)]
    pub area_hectares: Option<f64>,
    #[serde(default)]
    pub crop: Option<String>,
}

impl Talhao {
    #[must_use]
    pub fn new(fazenda_id: RecordId, name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            fazenda_id,
            name: name.into(),
            area_hectares: None,
            crop: None,
        }
    }
}

impl SyncRecord for Talhao {
    const ENTITY_TYPE: EntityType = EntityType::Talhao;
    const COLUMNS: &'static [&'static str] = &["fazenda_id", "name", "area_hectares", "crop"];

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.fazenda_id.as_str()),
            text(&self.name),
            opt_real(self.area_hectares),
            opt_text(self.crop.as_ref()),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            fazenda_id: get_id(row, FIRST_COLUMN)?,
            name: row.get(FIRST_COLUMN + 1)?,
            area_hectares: row.get(FIRST_COLUMN + 2)?,
            crop: row.get(FIRST_COLUMN + 3)?,
        })
    }

    fn validate(&self) -> Result<()> {
        require_name("talhao name", &self.name)?;
        if self.area_hectares.is_some_and(|area| !area.is_finite() || area < 0.0) {
            return Err(Error::InvalidInput(
                "talhao area must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

/// A geolocated field inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scout {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub talhao_id: RecordId,
    pub latitude: f64,
    pub longitude: f64,
    /// Inspection timestamp (Unix ms)
    pub observed_at: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Scout {
    #[must_use]
    pub fn new(talhao_id: RecordId, latitude: f64, longitude: f64) -> Self {
        let meta = RecordMeta::new();
        let observed_at = meta.created_at;
        Self {
            meta,
            talhao_id,
            latitude,
            longitude,
            observed_at,
            notes: None,
        }
    }
}

impl SyncRecord for Scout {
    const ENTITY_TYPE: EntityType = EntityType::Scout;
    const COLUMNS: &'static [&'static str] =
        &["talhao_id", "latitude", "longitude", "observed_at", "notes"];

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.talhao_id.as_str()),
            Value::Real(self.latitude),
            Value::Real(self.longitude),
            Value::Integer(self.observed_at),
            opt_text(self.notes.as_ref()),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            talhao_id: get_id(row, FIRST_COLUMN)?,
            latitude: row.get(FIRST_COLUMN + 1)?,
            longitude: row.get(FIRST_COLUMN + 2)?,
            observed_at: row.get(FIRST_COLUMN + 3)?,
            notes: row.get(FIRST_COLUMN + 4)?,
        })
    }

    fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::InvalidInput(format!(
                "latitude {} is out of range",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::InvalidInput(format!(
                "longitude {} is out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Infestation level of a pest observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(Error::InvalidInput(format!("unknown severity '{other}'"))),
        }
    }
}

/// A pest observed during a scout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Praga {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub scout_id: RecordId,
    pub name: String,
    /// Reference into the remote pest catalog, when resolved
    #[serde(default)]
    pub catalog_ref: Option<String>,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub severity: Severity,
}

impl Praga {
    #[must_use]
    pub fn new(scout_id: RecordId, name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            scout_id,
            name: name.into(),
            catalog_ref: None,
            quantity: 0,
            severity: Severity::Low,
        }
    }
}

impl SyncRecord for Praga {
    const ENTITY_TYPE: EntityType = EntityType::Praga;
    const COLUMNS: &'static [&'static str] =
        &["scout_id", "name", "catalog_ref", "quantity", "severity"];

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.scout_id.as_str()),
            text(&self.name),
            opt_text(self.catalog_ref.as_ref()),
            Value::Integer(i64::from(self.quantity)),
            text(self.severity.as_str()),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>) -> rusqlite::Result<Self> {
        let severity: String = row.get(FIRST_COLUMN + 4)?;
        Ok(Self {
            meta,
            scout_id: get_id(row, FIRST_COLUMN)?,
            name: row.get(FIRST_COLUMN + 1)?,
            catalog_ref: row.get(FIRST_COLUMN + 2)?,
            quantity: row.get(FIRST_COLUMN + 3)?,
            severity: severity.parse().unwrap_or_default(),
        })
    }

    fn validate(&self) -> Result<()> {
        require_name("praga name", &self.name)
    }
}

/// Work performed on a talhao
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub talhao_id: RecordId,
    /// Activity kind, e.g. "spraying" or "planting"
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    /// When the work was performed (Unix ms)
    pub performed_at: i64,
}

impl Activity {
    #[must_use]
    pub fn new(talhao_id: RecordId, kind: impl Into<String>) -> Self {
        let meta = RecordMeta::new();
        let performed_at = meta.created_at;
        Self {
            meta,
            talhao_id,
            kind: kind.into(),
            description: None,
            performed_at,
        }
    }
}

impl SyncRecord for Activity {
    const ENTITY_TYPE: EntityType = EntityType::Activity;
    const COLUMNS: &'static [&'static str] = &["talhao_id", "kind", "description", "performed_at"];

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.talhao_id.as_str()),
            text(&self.kind),
            opt_text(self.description.as_ref()),
            Value::Integer(self.performed_at),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            talhao_id: get_id(row, FIRST_COLUMN)?,
            kind: row.get(FIRST_COLUMN + 1)?,
            description: row.get(FIRST_COLUMN + 2)?,
            performed_at: row.get(FIRST_COLUMN + 3)?,
        })
    }

    fn validate(&self) -> Result<()> {
        require_name("activity kind", &self.kind)
    }
}
