use std::path::Path;

use chrono::Utc;
use fieldwatch_core::models::RecognitionJob;
use fieldwatch_core::RecognitionId;
use serde_json::Value;

use crate::cli::RecognitionCommands;
use crate::commands::common::{
    format_recognition_lines, normalize_identifier, parse_json_object, Context,
};
use crate::error::CliError;

pub async fn run_recognition(
    command: RecognitionCommands,
    context: &Context,
) -> Result<(), CliError> {
    let store = context.open_store().await?;
    match command {
        RecognitionCommands::Add { image, metadata } => {
            let image_path = resolve_image_path(&image)?;
            let metadata = metadata
                .as_deref()
                .map(|raw| parse_json_object("metadata", raw).map(Value::Object))
                .transpose()?;
            let id = store.enqueue_recognition(image_path, metadata).await?;
            println!("{id}");
        }
        RecognitionCommands::List {
            status,
            limit,
            json,
        } => {
            let jobs = store
                .list_recognitions(status.map(Into::into), limit)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No recognition jobs.");
            } else {
                let now_ms = Utc::now().timestamp_millis();
                for line in format_recognition_lines(&jobs, now_ms) {
                    println!("{line}");
                }
                print_detections(&jobs);
            }
        }
        RecognitionCommands::Retry { id } => {
            let id = normalize_identifier(&id)?.parse::<RecognitionId>()?;
            if !store.retry_recognition(id).await? {
                return Err(CliError::NotFound(format!("errored recognition job {id}")));
            }
            println!("{id}");
        }
    }
    Ok(())
}

/// Store absolute paths so the daemon can find the file from any directory.
pub fn resolve_image_path(image: &Path) -> Result<String, CliError> {
    if !image.is_file() {
        return Err(CliError::NotFound(format!("image {}", image.display())));
    }
    let absolute = std::fs::canonicalize(image)?;
    Ok(absolute.to_string_lossy().into_owned())
}

fn print_detections(jobs: &[RecognitionJob]) {
    for job in jobs {
        let Some(detections) = job
            .result
            .as_ref()
            .and_then(|result| result.get("detections"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        let labels = detections
            .iter()
            .filter_map(|detection| detection.get("label").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(", ");
        if !labels.is_empty() {
            println!("{:>6}  detections: {labels}", job.id.0);
        }
    }
}
