use std::env;
use std::path::{Path, PathBuf};

use fieldwatch_core::models::{MutationEntry, RecognitionJob};
use fieldwatch_core::LocalStore;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config_file::{default_config_path, normalize_text_option, CliConfig};
use crate::error::CliError;

/// Global options resolved once per invocation
#[derive(Debug, Clone)]
pub struct Context {
    pub config_path: PathBuf,
    pub config: CliConfig,
    pub db_path: PathBuf,
}

impl Context {
    pub fn resolve(
        cli_db_path: Option<PathBuf>,
        cli_config_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let config_path = cli_config_path
            .or_else(|| env::var_os("FIELDWATCH_CONFIG").map(PathBuf::from))
            .unwrap_or_else(default_config_path);
        let config = CliConfig::load_from_path(&config_path).map_err(CliError::Config)?;
        let db_path = resolve_db_path(cli_db_path, config.db_path.clone());
        Ok(Self {
            config_path,
            config,
            db_path,
        })
    }

    pub async fn open_store(&self) -> Result<LocalStore, CliError> {
        let settings = self.config.effective_settings().map_err(CliError::Config)?;
        let store = LocalStore::open_path(&self.db_path)
            .await?
            .with_max_retries(settings.max_retries);
        Ok(store)
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, configured: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FIELDWATCH_DB_PATH").map(PathBuf::from))
        .or(configured)
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldwatch")
        .join("fieldwatch.db")
}

/// Parse a command-line JSON argument that must be an object
pub fn parse_json_object(field: &'static str, raw: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CliError::InvalidJson {
            field,
            reason: "expected a JSON object".to_string(),
        }),
        Err(error) => Err(CliError::InvalidJson {
            field,
            reason: error.to_string(),
        }),
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    normalize_text_option(Some(id.to_string())).ok_or(CliError::EmptyId)
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

#[derive(Debug, Serialize)]
pub struct MutationItem {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub status: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub next_retry_at: Option<String>,
    pub created_at: String,
}

pub fn mutation_to_item(entry: &MutationEntry) -> MutationItem {
    MutationItem {
        id: entry.id.0,
        entity_type: entry.entity_type.to_string(),
        entity_id: entry.entity_id.clone(),
        operation: entry.operation.to_string(),
        status: entry.status.to_string(),
        retry_count: entry.retry_count,
        max_retries: entry.max_retries,
        error: describe_error(
            entry.error_kind.map(|kind| kind.to_string()),
            entry.error_message.as_deref(),
        ),
        next_retry_at: entry.next_retry_at.map(format_timestamp),
        created_at: format_timestamp(entry.created_at),
    }
}

pub fn format_mutation_lines(entries: &[MutationEntry], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let base = format!(
                "{:>6}  {:<10}  {:<8}  {:<8} {:<13}  {}/{}  {}",
                entry.id.0,
                entry.status.as_str(),
                entry.entity_type.as_str(),
                entry.operation.as_str(),
                short_id(&entry.entity_id),
                entry.retry_count,
                entry.max_retries,
                format_relative_time(entry.created_at, now_ms)
            );
            match describe_error(
                entry.error_kind.map(|kind| kind.to_string()),
                entry.error_message.as_deref(),
            ) {
                Some(error) => format!("{base}  {error}"),
                None => base,
            }
        })
        .collect()
}

pub fn format_recognition_lines(jobs: &[RecognitionJob], now_ms: i64) -> Vec<String> {
    jobs.iter()
        .map(|job| {
            let file = Path::new(&job.image_path)
                .file_name()
                .map_or_else(|| job.image_path.clone(), |name| name.to_string_lossy().into_owned());
            let base = format!(
                "{:>6}  {:<10}  {:<24}  attempts={}  {}",
                job.id.0,
                job.status.as_str(),
                file,
                job.attempts,
                format_relative_time(job.updated_at, now_ms)
            );
            match describe_error(
                job.error_kind.map(|kind| kind.to_string()),
                job.error_message.as_deref(),
            ) {
                Some(error) => format!("{base}  {error}"),
                None => base,
            }
        })
        .collect()
}

fn describe_error(kind: Option<String>, message: Option<&str>) -> Option<String> {
    match (kind, message) {
        (Some(kind), Some(message)) => Some(format!("[{kind}] {message}")),
        (Some(kind), None) => Some(format!("[{kind}]")),
        (None, Some(message)) => Some(message.to_string()),
        (None, None) => None,
    }
}
