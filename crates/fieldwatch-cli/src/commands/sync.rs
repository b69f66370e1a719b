use std::env;
use std::sync::Arc;

use fieldwatch_core::network::HttpProbe;
use fieldwatch_core::{
    DrainReport, HttpRemoteGateway, NetworkMonitor, RecognitionProcessor, RecognitionReport,
    SyncEngine, SyncRuntime, SyncSettings,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::cli::{RemoteArgs, SyncCommands};
use crate::commands::common::Context;
use crate::config_file::{is_http_url, normalize_text_option};
use crate::error::CliError;

/// Backend coordinates after merging flags, environment and config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub endpoint: String,
    pub token: Option<String>,
    pub health_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CycleReports<'a> {
    mutations: &'a DrainReport,
    recognitions: &'a RecognitionReport,
}

pub async fn run_sync(command: SyncCommands, context: &Context) -> Result<(), CliError> {
    match command {
        SyncCommands::Once { remote, json } => run_sync_once(remote, json, context).await,
        SyncCommands::Daemon { remote } => run_sync_daemon(remote, context).await,
    }
}

pub fn resolve_remote(
    remote: RemoteArgs,
    context: &Context,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RemoteTarget, CliError> {
    let endpoint = normalize_text_option(remote.endpoint)
        .or_else(|| normalize_text_option(lookup("FIELDWATCH_ENDPOINT")))
        .or_else(|| context.config.endpoint())
        .ok_or(CliError::EndpointNotConfigured)?;
    if !is_http_url(&endpoint) {
        return Err(CliError::Config(format!(
            "endpoint must include http:// or https://: {endpoint}"
        )));
    }

    Ok(RemoteTarget {
        endpoint,
        token: normalize_text_option(remote.token)
            .or_else(|| normalize_text_option(lookup("FIELDWATCH_TOKEN"))),
        health_url: normalize_text_option(remote.health_url)
            .or_else(|| normalize_text_option(lookup("FIELDWATCH_HEALTH_URL")))
            .or_else(|| context.config.health_url()),
    })
}

async fn connect(
    target: &RemoteTarget,
    settings: &SyncSettings,
) -> Result<(Arc<HttpRemoteGateway>, NetworkMonitor), CliError> {
    let gateway = HttpRemoteGateway::new(&target.endpoint, settings.request_timeout())?;
    gateway.set_access_token(target.token.clone()).await;

    let network = if let Some(health_url) = &target.health_url {
        let probe = HttpProbe::new(health_url, settings.request_timeout())?;
        let monitor =
            NetworkMonitor::new(Arc::new(probe), settings.probe_interval(), false);
        monitor.check_now().await;
        monitor
    } else {
        // Without a health URL, reachability shows up as retryable failures
        NetworkMonitor::fixed(true).0
    };

    Ok((Arc::new(gateway), network))
}

async fn run_sync_once(remote: RemoteArgs, as_json: bool, context: &Context) -> Result<(), CliError> {
    let target = resolve_remote(remote, context, |name| env::var(name).ok())?;
    let settings = context.config.effective_settings().map_err(CliError::Config)?;
    let store = context.open_store().await?;
    let (gateway, network) = connect(&target, &settings).await?;

    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.send_replace(true);
        }
    });

    store
        .recover_stale_processing(settings.stale_processing_threshold())
        .await?;
    let engine = SyncEngine::new(
        store.clone(),
        gateway.clone(),
        network.clone(),
        settings.clone(),
    );
    let mutations = engine.drain(shutdown_rx.clone()).await?;
    let recognizer = RecognitionProcessor::new(store, gateway, network, settings);
    let recognitions = recognizer.drain(shutdown_rx).await?;

    if as_json {
        let reports = CycleReports {
            mutations: &mutations,
            recognitions: &recognitions,
        };
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for line in format_cycle_lines(&mutations, &recognitions) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_sync_daemon(remote: RemoteArgs, context: &Context) -> Result<(), CliError> {
    let target = resolve_remote(remote, context, |name| env::var(name).ok())?;
    let settings = context.config.effective_settings().map_err(CliError::Config)?;
    let store = context.open_store().await?;
    let (gateway, network) = connect(&target, &settings).await?;

    let runtime = SyncRuntime::start(store, gateway, network, settings).await?;
    let recovered = runtime.recovered();
    if recovered.mutations > 0 || recovered.recognitions > 0 {
        println!(
            "Recovered {} mutation(s) and {} recognition job(s) left in flight",
            recovered.mutations, recovered.recognitions
        );
    }
    println!("Syncing against {} (Ctrl-C to stop)", target.endpoint);

    let mut updates = runtime.subscribe();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            tracing::info!(
                "state={:?} pending={} failed={} recognitions={} online={}",
                snapshot.state(),
                snapshot.pending_sync_count,
                snapshot.failed_sync_count,
                snapshot.pending_recognition_count,
                snapshot.is_online
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("Stopping...");
    runtime.shutdown().await;
    reporter.abort();
    Ok(())
}

pub fn format_cycle_lines(mutations: &DrainReport, recognitions: &RecognitionReport) -> Vec<String> {
    let mut lines = Vec::new();
    match mutations.skipped {
        Some(reason) => lines.push(format!("Mutations: skipped ({reason:?})")),
        None => lines.push(format!(
            "Mutations: {} synced, {} retrying, {} failed, {} released in {} round(s)",
            mutations.synced.len(),
            mutations.retried.len(),
            mutations.failed.len(),
            mutations.released.len(),
            mutations.rounds
        )),
    }
    for entry in mutations.retried.iter().chain(&mutations.failed) {
        lines.push(format!(
            "  #{} {} {} {}: {}",
            entry.id,
            entry.operation,
            entry.entity_type,
            entry.entity_id,
            entry.error.as_deref().unwrap_or("unknown error")
        ));
    }
    match recognitions.skipped {
        Some(reason) => lines.push(format!("Recognitions: skipped ({reason:?})")),
        None => lines.push(format!(
            "Recognitions: {} done, {} failed, {} requeued",
            recognitions.completed.len(),
            recognitions.failed.len(),
            recognitions.requeued
        )),
    }
    if mutations.auth_required || recognitions.auth_required {
        lines.push("The backend refused the session; renew the token and run again.".to_string());
    }
    if mutations.cancelled || recognitions.cancelled {
        lines.push("Cancelled; in-flight work was returned to the queue.".to_string());
    }
    lines
}
