use std::path::PathBuf;

use clap::Parser;
use fieldwatch_core::models::{Fazenda, MutationOperation};
use fieldwatch_core::{DrainReport, LocalStore, RecognitionReport};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::cli::{Cli, Commands, EntityArg, QueueCommands, RemoteArgs, SyncCommands};
use crate::commands::common::{format_relative_time, parse_json_object, Context};
use crate::commands::config::merge_config;
use crate::commands::queue::parse_mutation_id;
use crate::commands::record::{apply_patch, create_record, delete_record, list_records, update_record};
use crate::commands::sync::{format_cycle_lines, resolve_remote, RemoteTarget};
use crate::config_file::CliConfig;
use crate::error::CliError;

fn context_with(config: CliConfig) -> Context {
    Context {
        config_path: PathBuf::from("/tmp/fieldwatch-test/cli-config.json"),
        config,
        db_path: PathBuf::from("/tmp/fieldwatch-test/fieldwatch.db"),
    }
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(now - 21 * 86_400_000, now), "3w ago");
}

#[test]
fn parse_json_object_rejects_non_objects() {
    assert!(parse_json_object("record", r#"{"name": "Santa Rita"}"#).is_ok());
    assert!(matches!(
        parse_json_object("record", "[1, 2]"),
        Err(CliError::InvalidJson { field: "record", .. })
    ));
    assert!(matches!(
        parse_json_object("metadata", "{not json"),
        Err(CliError::InvalidJson { field: "metadata", .. })
    ));
}

#[test]
fn parse_mutation_id_trims_and_rejects_empty() {
    assert_eq!(parse_mutation_id(" 42 ").unwrap().0, 42);
    assert!(matches!(parse_mutation_id("  "), Err(CliError::EmptyId)));
    assert!(parse_mutation_id("abc").is_err());
}

#[test]
fn queue_retry_requires_id_or_all() {
    assert!(Cli::try_parse_from(["fieldwatch", "queue", "retry"]).is_err());
    assert!(Cli::try_parse_from(["fieldwatch", "queue", "retry", "3", "--all"]).is_err());

    let cli = Cli::try_parse_from(["fieldwatch", "queue", "retry", "--all"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Queue {
            command: QueueCommands::Retry { id: None, all: true }
        }
    ));
}

#[test]
fn global_paths_are_accepted_after_subcommand() {
    let cli = Cli::try_parse_from([
        "fieldwatch",
        "sync",
        "once",
        "--endpoint",
        "https://api.example.com",
        "--db-path",
        "/data/fw.db",
    ])
    .unwrap();
    assert_eq!(cli.db_path, Some(PathBuf::from("/data/fw.db")));
    let Commands::Sync {
        command: SyncCommands::Once { remote, json },
    } = cli.command
    else {
        panic!("expected sync once");
    };
    assert!(!json);
    assert_eq!(remote.endpoint.as_deref(), Some("https://api.example.com"));
}

#[test]
fn resolve_remote_prefers_flag_then_env_then_config() {
    let context = context_with(CliConfig {
        endpoint: Some("https://config.example.com".to_string()),
        health_url: Some("https://config.example.com/health".to_string()),
        ..CliConfig::default()
    });

    let from_flag = resolve_remote(
        RemoteArgs {
            endpoint: Some("https://flag.example.com".to_string()),
            token: Some(" secret ".to_string()),
            health_url: None,
        },
        &context,
        |_| Some("https://env.example.com".to_string()),
    )
    .unwrap();
    assert_eq!(
        from_flag,
        RemoteTarget {
            endpoint: "https://flag.example.com".to_string(),
            token: Some("secret".to_string()),
            health_url: Some("https://env.example.com".to_string()),
        }
    );

    let from_env = resolve_remote(RemoteArgs::default(), &context, |name| {
        (name == "FIELDWATCH_ENDPOINT").then(|| "https://env.example.com".to_string())
    })
    .unwrap();
    assert_eq!(from_env.endpoint, "https://env.example.com");
    assert_eq!(from_env.token, None);
    assert_eq!(
        from_env.health_url.as_deref(),
        Some("https://config.example.com/health")
    );

    let from_config = resolve_remote(RemoteArgs::default(), &context, |_| None).unwrap();
    assert_eq!(from_config.endpoint, "https://config.example.com");
}

#[test]
fn resolve_remote_requires_endpoint() {
    let context = context_with(CliConfig::default());
    assert!(matches!(
        resolve_remote(RemoteArgs::default(), &context, |_| None),
        Err(CliError::EndpointNotConfigured)
    ));
    assert!(matches!(
        resolve_remote(
            RemoteArgs {
                endpoint: Some("api.example.com".to_string()),
                ..RemoteArgs::default()
            },
            &context,
            |_| None
        ),
        Err(CliError::Config(_))
    ));
}

#[test]
fn merge_config_keeps_existing_values() {
    let existing = CliConfig {
        version: 1,
        endpoint: Some("https://old.example.com".to_string()),
        health_url: Some("https://old.example.com/health".to_string()),
        ..CliConfig::default()
    };

    let merged = merge_config(
        existing,
        Some(" https://new.example.com/ ".to_string()),
        None,
        Some(PathBuf::from("/data/fw.db")),
    )
    .unwrap();
    assert_eq!(merged.endpoint.as_deref(), Some("https://new.example.com"));
    assert_eq!(
        merged.health_url.as_deref(),
        Some("https://old.example.com/health")
    );
    assert_eq!(merged.db_path, Some(PathBuf::from("/data/fw.db")));

    assert!(merge_config(CliConfig::default(), Some("ftp://x".to_string()), None, None).is_err());
}

#[test]
fn apply_patch_ignores_store_owned_fields() {
    let record = json!({"id": "a", "synced": true, "name": "Old", "city": null});
    let patch = parse_json_object("patch", r#"{"id": "b", "synced": false, "city": "Sinop"}"#)
        .unwrap();

    let patched = apply_patch(record, patch);
    assert_eq!(patched, json!({"id": "a", "synced": true, "name": "Old", "city": "Sinop"}));
}

#[tokio::test]
async fn record_commands_write_through_the_queue() {
    let store = LocalStore::open_in_memory().await.unwrap();

    let created = create_record(
        &store,
        EntityArg::Fazenda,
        r#"{"name": "Santa Rita", "id": "ignored", "synced": true}"#,
    )
    .await
    .unwrap();
    let updated = update_record(&store, EntityArg::Fazenda, &created.id, r#"{"city": "Sorriso"}"#)
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);

    let records = list_records(&store, EntityArg::Fazenda, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["city"], "Sorriso");
    assert_eq!(records[0]["synced"], false);

    let deleted = delete_record(&store, EntityArg::Fazenda, &created.id)
        .await
        .unwrap();
    assert!(list_records(&store, EntityArg::Fazenda, 10)
        .await
        .unwrap()
        .is_empty());

    // The record never left the device, so the delete settles locally
    assert_eq!(deleted.mutation_id, None);
    assert!(store.list_mutations(None, 10).await.unwrap().is_empty());

    let sent = create_record(&store, EntityArg::Fazenda, r#"{"name": "Boa Vista"}"#)
        .await
        .unwrap();
    let claimed = store.claim_mutations(10).await.unwrap();
    store.ack_mutation(claimed[0].id, Some("srv-1")).await.unwrap();
    let deleted = delete_record(&store, EntityArg::Fazenda, &sent.id)
        .await
        .unwrap();

    let entries = store.list_mutations(None, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, MutationOperation::Delete);
    assert_eq!(deleted.mutation_id, Some(entries[0].id.0));
}

#[tokio::test]
async fn update_of_missing_record_is_not_found() {
    let store = LocalStore::open_in_memory().await.unwrap();
    let missing = Fazenda::new("never stored");

    let result = update_record(
        &store,
        EntityArg::Fazenda,
        &missing.meta.id.as_str(),
        r#"{"name": "x"}"#,
    )
    .await;
    assert!(matches!(result, Err(CliError::NotFound(_))));
}

#[test]
fn cycle_lines_summarize_both_queues() {
    let mutations = DrainReport {
        rounds: 2,
        ..DrainReport::default()
    };
    let recognitions = RecognitionReport {
        requeued: 1,
        auth_required: true,
        ..RecognitionReport::default()
    };

    let lines = format_cycle_lines(&mutations, &recognitions);
    assert_eq!(
        lines,
        vec![
            "Mutations: 0 synced, 0 retrying, 0 failed, 0 released in 2 round(s)".to_string(),
            "Recognitions: 0 done, 0 failed, 1 requeued".to_string(),
            "The backend refused the session; renew the token and run again.".to_string(),
        ]
    );
}
