use chrono::Utc;
use fieldwatch_core::MutationId;
use serde::Serialize;

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_mutation_lines, format_timestamp, mutation_to_item, normalize_identifier, Context,
    MutationItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub pending_sync_count: u64,
    pub failed_sync_count: u64,
    pub pending_recognition_count: u64,
    pub last_sync_at: Option<i64>,
    pub last_sync_at_iso: Option<String>,
}

pub async fn run_queue(command: QueueCommands, context: &Context) -> Result<(), CliError> {
    let store = context.open_store().await?;
    match command {
        QueueCommands::Status { json } => {
            let last_sync_at = store.last_sync_at().await?;
            let snapshot = store.state().snapshot();
            let status = QueueStatus {
                pending_sync_count: snapshot.pending_sync_count,
                failed_sync_count: snapshot.failed_sync_count,
                pending_recognition_count: snapshot.pending_recognition_count,
                last_sync_at,
                last_sync_at_iso: last_sync_at.map(format_timestamp),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                for line in format_status_lines(&status) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::List {
            status,
            limit,
            json,
        } => {
            let entries = store.list_mutations(status.map(Into::into), limit).await?;
            if json {
                let items = entries
                    .iter()
                    .map(mutation_to_item)
                    .collect::<Vec<MutationItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if entries.is_empty() {
                println!("Mutation queue is empty.");
            } else {
                let now_ms = Utc::now().timestamp_millis();
                for line in format_mutation_lines(&entries, now_ms) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Retry { id, all } => {
            if all {
                let count = store.retry_all_failed().await?;
                println!("Requeued {count} failed mutation(s)");
            } else {
                let id = parse_mutation_id(id.as_deref().unwrap_or_default())?;
                if !store.retry_mutation(id).await? {
                    return Err(CliError::NotFound(format!("failed mutation {id}")));
                }
                println!("{id}");
            }
        }
        QueueCommands::Discard { id } => {
            let id = parse_mutation_id(&id)?;
            if !store.discard_mutation(id).await? {
                return Err(CliError::NotFound(format!("queued mutation {id}")));
            }
            println!("{id}");
        }
    }
    Ok(())
}

pub fn parse_mutation_id(raw: &str) -> Result<MutationId, CliError> {
    Ok(normalize_identifier(raw)?.parse::<MutationId>()?)
}

pub fn format_status_lines(status: &QueueStatus) -> Vec<String> {
    vec![
        format!("Pending mutations:    {}", status.pending_sync_count),
        format!("Failed mutations:     {}", status.failed_sync_count),
        format!("Pending recognitions: {}", status.pending_recognition_count),
        format!(
            "Last sync:            {}",
            status.last_sync_at_iso.as_deref().unwrap_or("never")
        ),
    ]
}
