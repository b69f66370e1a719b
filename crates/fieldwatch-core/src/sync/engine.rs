//! Mutation queue drain engine.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use super::backoff::BackoffPolicy;
use super::scheduler::DrainTask;
use super::shutdown_requested;
use crate::config::SyncSettings;
use crate::db::FailDisposition;
use crate::gateway::{FatalKind, MutationRequest, Outcome, RemoteGateway};
use crate::models::{EntityType, FailureKind, MutationEntry, MutationId, MutationOperation};
use crate::network::NetworkMonitor;
use crate::services::LocalStore;
use crate::util::now_millis;
use crate::error::Result;

/// Why a drain cycle did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
    AuthRequired,
}

/// Snapshot of one queue entry after the cycle touched it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettledEntry {
    pub id: MutationId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: MutationOperation,
    /// Retries spent when the entry was settled
    pub retry_count: u32,
    pub error: Option<String>,
}

impl SettledEntry {
    fn new(entry: &MutationEntry, retry_count: u32, error: Option<String>) -> Self {
        Self {
            id: entry.id,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id.clone(),
            operation: entry.operation,
            retry_count,
            error,
        }
    }
}

/// What one drain cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub skipped: Option<SkipReason>,
    pub rounds: usize,
    pub synced: Vec<SettledEntry>,
    pub retried: Vec<SettledEntry>,
    pub failed: Vec<SettledEntry>,
    /// Returned to `pending` untouched (cancellation or expired session)
    pub released: Vec<SettledEntry>,
    pub cancelled: bool,
    pub auth_required: bool,
    pub duration_ms: i64,
}

impl DrainReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    /// Entries the gateway was asked to apply
    pub fn attempted(&self) -> usize {
        self.synced.len() + self.retried.len() + self.failed.len()
    }
}

/// Drains the mutation queue against the remote gateway.
///
/// Only entity heads are claimable, so each round applies at most one entry
/// per entity and the next round picks up the following one. Entries of
/// different entities run concurrently, bounded by `max_concurrency`.
pub struct SyncEngine {
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
    network: NetworkMonitor,
    settings: SyncSettings,
    backoff: BackoffPolicy,
    cycle: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        gateway: Arc<dyn RemoteGateway>,
        network: NetworkMonitor,
        settings: SyncSettings,
    ) -> Self {
        let backoff = BackoffPolicy::from_settings(&settings);
        Self {
            store,
            gateway,
            network,
            settings,
            backoff,
            cycle: Mutex::new(()),
        }
    }

    /// Override the retry delay policy
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Whether an expired session paused draining
    pub fn is_paused(&self) -> bool {
        self.store.state().auth_required()
    }

    /// Clear the pause set by an authentication failure.
    pub fn resume_after_reauth(&self) {
        if self.is_paused() {
            tracing::info!("Resuming sync after re-authentication");
        }
        self.store.state().set_auth_required(false);
    }

    /// Run one drain cycle unless one is already running.
    ///
    /// Storage errors abort the cycle; entries it left in `processing` are
    /// picked up by the next stale sweep.
    pub async fn drain(&self, mut shutdown: watch::Receiver<bool>) -> Result<DrainReport> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            tracing::debug!("Sync cycle already running; skipping");
            return Ok(DrainReport::skipped(SkipReason::AlreadyRunning));
        };
        if self.is_paused() {
            return Ok(DrainReport::skipped(SkipReason::AuthRequired));
        }
        if !self.network.is_online() {
            return Ok(DrainReport::skipped(SkipReason::Offline));
        }

        let started_at = Instant::now();
        self.store.state().set_syncing(true);
        let result = self.run_rounds(&mut shutdown).await;
        self.store.state().set_syncing(false);

        let mut report = match result {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!("Sync cycle aborted: {error}");
                return Err(error);
            }
        };
        report.duration_ms = i64::try_from(started_at.elapsed().as_millis()).unwrap_or(i64::MAX);

        if report.rounds > 0 {
            self.store.set_last_sync_at(now_millis()).await?;
        }
        tracing::info!(
            "Sync cycle done: rounds={} synced={} retried={} failed={} released={}",
            report.rounds,
            report.synced.len(),
            report.retried.len(),
            report.failed.len(),
            report.released.len()
        );
        Ok(report)
    }

    async fn run_rounds(&self, shutdown: &mut watch::Receiver<bool>) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        let recovered = self
            .store
            .recover_stale_mutations(self.settings.stale_processing_threshold())
            .await?;
        if recovered > 0 {
            tracing::info!("Reset {recovered} stale mutation(s) before draining");
        }

        for _ in 0..self.settings.max_rounds_per_cycle {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }
            if self.is_paused() || !self.network.is_online() {
                break;
            }

            let claimed = self.store.claim_mutations(self.settings.batch_size).await?;
            if claimed.is_empty() {
                break;
            }
            report.rounds += 1;

            let mut in_flight: HashSet<MutationId> = claimed.iter().map(|entry| entry.id).collect();
            let gateway = &self.gateway;
            let mut results = stream::iter(claimed)
                .map(|entry| async move {
                    let request = MutationRequest::from(&entry);
                    let outcome = gateway.apply_mutation(&request).await;
                    (entry, outcome)
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
                        let Some((entry, outcome)) = next else {
                            break;
                        };
                        in_flight.remove(&entry.id);
                        self.settle(&entry, outcome, &mut report).await?;
                    }
                }
            }
            drop(results);

            if report.cancelled {
                self.release_claims(in_flight, &mut report).await?;
                break;
            }
        }

        Ok(report)
    }

    async fn settle(
        &self,
        entry: &MutationEntry,
        outcome: Outcome<Option<String>>,
        report: &mut DrainReport,
    ) -> Result<()> {
        match outcome {
            Outcome::Success(remote_id) => {
                self.store.ack_mutation(entry.id, remote_id.as_deref()).await?;
                tracing::debug!(
                    "Applied {} of {} {}",
                    entry.operation,
                    entry.entity_type,
                    entry.entity_id
                );
                report
                    .synced
                    .push(SettledEntry::new(entry, entry.retry_count, None));
            }
            Outcome::FatalFailure(FatalKind::Auth, reason) => {
                self.store
                    .release_mutation(entry.id, Some(FailureKind::Auth), Some(&reason))
                    .await?;
                if !self.is_paused() {
                    tracing::warn!("Backend refused the session ({reason}); pausing sync");
                }
                self.store.state().set_auth_required(true);
                report.auth_required = true;
                report
                    .released
                    .push(SettledEntry::new(entry, entry.retry_count, Some(reason)));
            }
            Outcome::RetryableFailure(reason) => {
                // Indexed by retries already spent: the first retry waits `base`
                let delay = self.backoff.delay(entry.retry_count);
                let disposition = self
                    .store
                    .fail_mutation(entry.id, FailureKind::Network, &reason, delay)
                    .await?;
                record_failure(entry, disposition, reason, report);
            }
            Outcome::FatalFailure(kind, reason) => {
                let disposition = self
                    .store
                    .fail_mutation(entry.id, kind.failure_kind(), &reason, Duration::ZERO)
                    .await?;
                record_failure(entry, disposition, reason, report);
            }
        }
        Ok(())
    }

    async fn release_claims(
        &self,
        in_flight: HashSet<MutationId>,
        report: &mut DrainReport,
    ) -> Result<()> {
        let mut ids: Vec<MutationId> = in_flight.into_iter().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(entry) = self.store.get_mutation(id).await? {
                if self.store.release_mutation(id, None, None).await? {
                    report
                        .released
                        .push(SettledEntry::new(&entry, entry.retry_count, None));
                }
            }
        }
        tracing::info!(
            "Sync cycle cancelled; released {} claimed mutation(s)",
            report.released.len()
        );
        Ok(())
    }
}

fn record_failure(
    entry: &MutationEntry,
    disposition: Option<FailDisposition>,
    reason: String,
    report: &mut DrainReport,
) {
    match disposition {
        Some(FailDisposition::Rescheduled(updated)) => {
            tracing::debug!(
                "Mutation {} will retry ({}/{}): {reason}",
                updated.id,
                updated.retry_count,
                updated.max_retries
            );
            report
                .retried
                .push(SettledEntry::new(entry, updated.retry_count, Some(reason)));
        }
        Some(FailDisposition::Failed(updated)) => {
            tracing::warn!(
                "Mutation {} for {} {} failed permanently: {reason}",
                updated.id,
                updated.entity_type,
                updated.entity_id
            );
            report
                .failed
                .push(SettledEntry::new(entry, updated.retry_count, Some(reason)));
        }
        Some(FailDisposition::Released(updated)) => {
            report
                .released
                .push(SettledEntry::new(entry, updated.retry_count, Some(reason)));
        }
        None => {
            tracing::debug!("Mutation {} vanished before its failure was recorded", entry.id);
        }
    }
}

#[async_trait]
impl DrainTask for SyncEngine {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn drain_once(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.drain(shutdown).await.map(|_| ())
    }
}
