//! Recognition job processor.
//!
//! Structurally the same loop as [`crate::sync::SyncEngine`] without entity
//! ordering: jobs are independent, so every pending job is claimable.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::config::SyncSettings;
use crate::error::Result;
use crate::gateway::{FatalKind, Outcome, RecognitionRequest, RemoteGateway};
use crate::models::{FailureKind, RecognitionId, RecognitionJob};
use crate::network::NetworkMonitor;
use crate::services::LocalStore;
use crate::sync::{shutdown_requested, DrainTask, SkipReason};

/// What one recognition cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecognitionReport {
    pub skipped: Option<SkipReason>,
    /// Transient failures put back in `pending` at cycle start
    pub requeued: usize,
    pub completed: Vec<RecognitionId>,
    pub failed: Vec<RecognitionId>,
    pub released: Vec<RecognitionId>,
    pub cancelled: bool,
    pub auth_required: bool,
    pub duration_ms: i64,
}

impl RecognitionReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

pub struct RecognitionProcessor {
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
    network: NetworkMonitor,
    settings: SyncSettings,
    cycle: Mutex<()>,
}

impl RecognitionProcessor {
    pub fn new(
        store: LocalStore,
        gateway: Arc<dyn RemoteGateway>,
        network: NetworkMonitor,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            network,
            settings,
            cycle: Mutex::new(()),
        }
    }

    /// Submit pending jobs until none are left or the cycle must stop.
    ///
    /// Each job is submitted at most once per cycle: failures land in
    /// `error` and are only requeued at the start of a later cycle.
    pub async fn drain(&self, mut shutdown: watch::Receiver<bool>) -> Result<RecognitionReport> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            return Ok(RecognitionReport::skipped(SkipReason::AlreadyRunning));
        };
        if self.store.state().auth_required() {
            return Ok(RecognitionReport::skipped(SkipReason::AuthRequired));
        }
        if !self.network.is_online() {
            return Ok(RecognitionReport::skipped(SkipReason::Offline));
        }

        let started_at = Instant::now();
        self.store.state().set_recognizing(true);
        let result = self.run(&mut shutdown).await;
        self.store.state().set_recognizing(false);

        let mut report = result.inspect_err(|error| {
            tracing::warn!("Recognition cycle aborted: {error}");
        })?;
        report.duration_ms = i64::try_from(started_at.elapsed().as_millis()).unwrap_or(i64::MAX);
        if !report.completed.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                "Recognition cycle done: completed={} failed={} released={}",
                report.completed.len(),
                report.failed.len(),
                report.released.len()
            );
        }
        Ok(report)
    }

    async fn run(&self, shutdown: &mut watch::Receiver<bool>) -> Result<RecognitionReport> {
        let mut report = RecognitionReport::default();

        self.store
            .recover_stale_recognitions(self.settings.stale_processing_threshold())
            .await?;
        report.requeued = self
            .store
            .requeue_retryable_recognitions(self.settings.recognition_max_attempts)
            .await?;

        for _ in 0..self.settings.max_rounds_per_cycle {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }
            if self.store.state().auth_required() || !self.network.is_online() {
                break;
            }

            let claimed = self
                .store
                .claim_recognitions(self.settings.batch_size)
                .await?;
            if claimed.is_empty() {
                break;
            }

            let mut in_flight: Vec<RecognitionId> = claimed.iter().map(|job| job.id).collect();
            let gateway = &self.gateway;
            let mut results = stream::iter(claimed)
                .map(|job| async move {
                    let outcome = submit(gateway.as_ref(), &job).await;
                    (job, outcome)
                })
                .buffer_unordered(self.settings.max_concurrency);

            loop {
                tokio::select! {
                    biased;
                    () = shutdown_requested(shutdown) => {
                        report.cancelled = true;
                        break;
                    }
                    next = results.next() => {
                        let Some((job, outcome)) = next else {
                            break;
                        };
                        in_flight.retain(|id| *id != job.id);
                        self.settle(&job, outcome, &mut report).await?;
                    }
                }
            }
            drop(results);

            if report.cancelled {
                for id in in_flight {
                    if self.store.release_recognition(id).await? {
                        report.released.push(id);
                    }
                }
                break;
            }
        }

        Ok(report)
    }

    async fn settle(
        &self,
        job: &RecognitionJob,
        outcome: Outcome<serde_json::Value>,
        report: &mut RecognitionReport,
    ) -> Result<()> {
        match outcome {
            Outcome::Success(result) => {
                self.store.complete_recognition(job.id, result).await?;
                report.completed.push(job.id);
            }
            Outcome::FatalFailure(FatalKind::Auth, reason) => {
                tracing::warn!("Recognition refused the session ({reason}); pausing");
                self.store.release_recognition(job.id).await?;
                self.store.state().set_auth_required(true);
                report.auth_required = true;
                report.released.push(job.id);
            }
            Outcome::RetryableFailure(reason) => {
                tracing::debug!("Recognition job {} failed transiently: {reason}", job.id);
                self.store
                    .fail_recognition(job.id, FailureKind::Network, &reason)
                    .await?;
                report.failed.push(job.id);
            }
            Outcome::FatalFailure(kind, reason) => {
                tracing::warn!("Recognition job {} failed: {reason}", job.id);
                self.store
                    .fail_recognition(job.id, kind.failure_kind(), &reason)
                    .await?;
                report.failed.push(job.id);
            }
        }
        Ok(())
    }
}

/// Missing images fail locally; there is nothing to send.
async fn submit(gateway: &dyn RemoteGateway, job: &RecognitionJob) -> Outcome<serde_json::Value> {
    let path = Path::new(&job.image_path);
    match tokio::fs::try_exists(path).await {
        Ok(true) => gateway.submit_recognition(&RecognitionRequest::from(job)).await,
        Ok(false) => Outcome::FatalFailure(
            FatalKind::Validation,
            format!("image not found: {}", job.image_path),
        ),
        Err(error) => Outcome::FatalFailure(
            FatalKind::Validation,
            format!("image unreadable: {}: {error}", job.image_path),
        ),
    }
}

#[async_trait]
impl DrainTask for RecognitionProcessor {
    fn name(&self) -> &'static str {
        "recognition"
    }

    async fn drain_once(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.drain(shutdown).await.map(|_| ())
    }
}
