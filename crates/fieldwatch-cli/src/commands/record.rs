use chrono::Utc;
use fieldwatch_core::models::{Activity, Fazenda, Praga, Scout, Talhao};
use fieldwatch_core::{EntityType, LocalStore, RecordId, SyncRecord};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cli::{EntityArg, RecordCommands};
use crate::commands::common::{
    format_relative_time, normalize_identifier, parse_json_object, short_id, Context,
};
use crate::error::CliError;

/// Fields owned by the store; patches cannot touch them
const META_FIELDS: [&str; 6] = [
    "id",
    "created_at",
    "updated_at",
    "synced",
    "deleted_at",
    "remote_id",
];

/// Run `$body` with `$record` bound to the concrete record type of `$entity`.
macro_rules! with_record_type {
    ($entity:expr, $record:ident => $body:expr) => {
        match $entity {
            EntityType::Fazenda => {
                type $record = Fazenda;
                $body
            }
            EntityType::Talhao => {
                type $record = Talhao;
                $body
            }
            EntityType::Scout => {
                type $record = Scout;
                $body
            }
            EntityType::Praga => {
                type $record = Praga;
                $body
            }
            EntityType::Activity => {
                type $record = Activity;
                $body
            }
        }
    };
}

#[derive(Debug, Serialize)]
pub struct WriteResult {
    pub id: String,
    /// `None` when the write settled locally and nothing will be sent
    pub mutation_id: Option<i64>,
}

pub async fn run_record(command: RecordCommands, context: &Context) -> Result<(), CliError> {
    let store = context.open_store().await?;
    match command {
        RecordCommands::Create { entity, json } => {
            let result = create_record(&store, entity, &json).await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        RecordCommands::Update { entity, id, json } => {
            let result = update_record(&store, entity, &id, &json).await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        RecordCommands::Delete { entity, id } => {
            let result = delete_record(&store, entity, &id).await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        RecordCommands::List {
            entity,
            limit,
            json,
        } => {
            let records = list_records(&store, entity, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No {} records.", EntityType::from(entity));
            } else {
                let now_ms = Utc::now().timestamp_millis();
                for line in format_record_lines(&records, now_ms) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

pub async fn create_record(
    store: &LocalStore,
    entity: EntityArg,
    json: &str,
) -> Result<WriteResult, CliError> {
    let mut fields = parse_json_object("record", json)?;
    for key in META_FIELDS {
        fields.remove(key);
    }
    with_record_type!(EntityType::from(entity), R => {
        let record: R = serde_json::from_value(Value::Object(fields))?;
        let (record, mutation_id) = store.create_record(record).await?;
        Ok(WriteResult {
            id: record.id().as_str(),
            mutation_id: Some(mutation_id.0),
        })
    })
}

pub async fn update_record(
    store: &LocalStore,
    entity: EntityArg,
    id: &str,
    json: &str,
) -> Result<WriteResult, CliError> {
    let id = parse_record_id(id)?;
    let patch = parse_json_object("patch", json)?;
    let entity = EntityType::from(entity);
    with_record_type!(entity, R => {
        let existing = store
            .get_record::<R>(&id)
            .await?
            .ok_or_else(|| CliError::NotFound(format!("{entity} {id}")))?;
        let merged: R = serde_json::from_value(apply_patch(serde_json::to_value(&existing)?, patch))?;
        let (record, mutation_id) = store.update_record(merged).await?;
        Ok(WriteResult {
            id: record.id().as_str(),
            mutation_id: Some(mutation_id.0),
        })
    })
}

pub async fn delete_record(
    store: &LocalStore,
    entity: EntityArg,
    id: &str,
) -> Result<WriteResult, CliError> {
    let id = parse_record_id(id)?;
    let mutation_id = with_record_type!(EntityType::from(entity), R => {
        store.delete_record::<R>(&id).await?
    });
    Ok(WriteResult {
        id: id.as_str(),
        mutation_id: mutation_id.map(|mutation_id| mutation_id.0),
    })
}

pub async fn list_records(
    store: &LocalStore,
    entity: EntityArg,
    limit: usize,
) -> Result<Vec<Value>, CliError> {
    with_record_type!(EntityType::from(entity), R => {
        let records = store.list_records::<R>(limit, 0).await?;
        records
            .iter()
            .map(|record| serde_json::to_value(record).map_err(CliError::from))
            .collect()
    })
}

/// Overlay `patch` on a serialized record, leaving store-owned fields alone.
pub fn apply_patch(mut record: Value, patch: Map<String, Value>) -> Value {
    if let Some(object) = record.as_object_mut() {
        for (key, value) in patch {
            if !META_FIELDS.contains(&key.as_str()) {
                object.insert(key, value);
            }
        }
    }
    record
}

pub fn format_record_lines(records: &[Value], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let id = record["id"].as_str().unwrap_or_default();
            let state = if record["synced"].as_bool().unwrap_or(false) {
                "synced"
            } else {
                "pending"
            };
            let updated = record["updated_at"]
                .as_i64()
                .map(|updated_at| format_relative_time(updated_at, now_ms))
                .unwrap_or_default();
            format!("{:<13}  {state:<7}  {updated:<10}  {}", short_id(id), record_label(record))
        })
        .collect()
}

fn record_label(record: &Value) -> String {
    ["name", "kind"]
        .iter()
        .find_map(|key| record[*key].as_str())
        .map_or_else(
            || match (record["latitude"].as_f64(), record["longitude"].as_f64()) {
                (Some(latitude), Some(longitude)) => format!("({latitude:.5}, {longitude:.5})"),
                _ => String::new(),
            },
            ToString::to_string,
        )
}

fn parse_record_id(id: &str) -> Result<RecordId, CliError> {
    Ok(normalize_identifier(id)?.parse::<RecordId>()?)
}
