//! Shared local store handle used by the engines and the app shell.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{
    Database, FailDisposition, MutationCounts, MutationQueue, RecognitionCounts,
    RecognitionQueue, RecordRepository, SqliteRecordRepository, SqliteSyncMetaRepository,
    SyncMetaRepository,
};
use crate::models::{
    EntityType, FailureKind, MutationEntry, MutationId, MutationOperation, MutationStatus,
    RecognitionId, RecognitionJob, RecognitionStatus, RecordId, SyncRecord,
};
use crate::state::SyncStateHandle;
use crate::util::{duration_millis, now_millis};
use crate::Result;

const DEFAULT_MAX_RETRIES: u32 = 5;

/// Rows reset by a stale-processing sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StaleRecovery {
    pub mutations: usize,
    pub recognitions: usize,
}

/// Thread-safe handle over the single local database.
///
/// Every mutating call runs in one transaction and republishes the queue
/// counters on the attached [`SyncStateHandle`] after it commits.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    state: SyncStateHandle,
    max_retries: u32,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    ///
    /// A file that is not a database at all is moved aside and a fresh one is
    /// created in its place.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable ({}); starting from a fresh file",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };

        let store = Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            state: SyncStateHandle::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        };
        store.refresh_counters().await?;
        Ok(store)
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let store = Self {
            db: Arc::new(Mutex::new(Database::open_in_memory()?)),
            db_path: None,
            state: SyncStateHandle::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        };
        store.refresh_counters().await?;
        Ok(store)
    }

    /// Retry budget stamped on entries enqueued from now on
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Database file, if not in memory
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Publisher of the derived counters
    pub const fn state(&self) -> &SyncStateHandle {
        &self.state
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = now_millis();
            let file_name = db_path
                .file_name()
                .map_or_else(|| "fieldwatch.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved unreadable local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        for suffix in ["-wal", "-shm"] {
            let mut sidecar = db_path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale sidecar file {}", sidecar.display());
            }
        }

        Ok(())
    }

    /// Run `op` inside one transaction, then republish counters.
    async fn write<R>(&self, op: impl FnOnce(&Transaction<'_>) -> Result<R> + Send) -> Result<R> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let result = op(&tx)?;
        tx.commit()?;
        self.publish_counts(db.connection());
        Ok(result)
    }

    async fn read<R>(&self, op: impl FnOnce(&Connection) -> Result<R> + Send) -> Result<R> {
        let db = self.db.lock().await;
        op(db.connection())
    }

    fn publish_counts(&self, conn: &Connection) {
        let counts = MutationQueue::new(conn)
            .counts()
            .and_then(|mutations| Ok((mutations, RecognitionQueue::new(conn).counts()?)));
        match counts {
            Ok((mutations, recognitions)) => self.state.set_counts(mutations, recognitions),
            Err(error) => tracing::warn!("Failed to refresh queue counters: {error}"),
        }
    }

    /// Recompute every published counter from the database
    pub async fn refresh_counters(&self) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let mutations = MutationQueue::new(conn).counts()?;
        let recognitions = RecognitionQueue::new(conn).counts()?;
        let last_sync_at = SqliteSyncMetaRepository::new(conn).last_sync_at()?;
        self.state.set_counts(mutations, recognitions);
        self.state.set_last_sync_at(last_sync_at);
        Ok(())
    }

    // -- Domain records ---------------------------------------------------

    /// Insert a record and enqueue its `create` in the same transaction.
    pub async fn create_record<T: SyncRecord>(&self, mut record: T) -> Result<(T, MutationId)> {
        let max_retries = self.max_retries;
        record.meta_mut().synced = false;
        self.write(move |tx| {
            SqliteRecordRepository::<T>::new(tx).insert(&record)?;
            let payload = record.payload()?;
            let id = MutationQueue::new(tx).enqueue(
                T::ENTITY_TYPE,
                &record.id().as_str(),
                MutationOperation::Create,
                &payload,
                max_retries,
            )?;
            tracing::debug!("Queued create of {} {}", T::ENTITY_TYPE, record.id());
            Ok((record, id))
        })
        .await
    }

    /// Update a record and enqueue its `update` in the same transaction.
    pub async fn update_record<T: SyncRecord>(&self, mut record: T) -> Result<(T, MutationId)> {
        let max_retries = self.max_retries;
        let meta = record.meta_mut();
        meta.updated_at = now_millis();
        meta.synced = false;
        self.write(move |tx| {
            SqliteRecordRepository::<T>::new(tx).update(&record)?;
            let payload = record.payload()?;
            let id = MutationQueue::new(tx).enqueue(
                T::ENTITY_TYPE,
                &record.id().as_str(),
                MutationOperation::Update,
                &payload,
                max_retries,
            )?;
            tracing::debug!("Queued update of {} {}", T::ENTITY_TYPE, record.id());
            Ok((record, id))
        })
        .await
    }

    /// Soft delete a record and enqueue its `delete` in the same transaction.
    ///
    /// Returns `None` when the record never reached the backend; its queued
    /// entries are dropped and nothing is sent.
    pub async fn delete_record<T: SyncRecord>(&self, id: &RecordId) -> Result<Option<MutationId>> {
        let max_retries = self.max_retries;
        let id = *id;
        self.write(move |tx| {
            let deleted = SqliteRecordRepository::<T>::new(tx).soft_delete(&id)?;
            let payload = serde_json::json!({
                "id": id.as_str(),
                "deleted_at": deleted.meta().deleted_at,
                "remote_id": deleted.meta().remote_id,
            });
            let mutation = MutationQueue::new(tx).enqueue_delete(
                T::ENTITY_TYPE,
                &id.as_str(),
                &payload,
                max_retries,
            )?;
            match mutation {
                Some(_) => tracing::debug!("Queued delete of {} {id}", T::ENTITY_TYPE),
                None => tracing::debug!("Deleted unsent {} {id} locally", T::ENTITY_TYPE),
            }
            Ok(mutation)
        })
        .await
    }

    /// Fetch a live record by id.
    pub async fn get_record<T: SyncRecord>(&self, id: &RecordId) -> Result<Option<T>> {
        let id = *id;
        self.read(move |conn| SqliteRecordRepository::<T>::new(conn).get(&id))
            .await
    }

    /// List live records, most recently updated first.
    pub async fn list_records<T: SyncRecord>(&self, limit: usize, offset: usize) -> Result<Vec<T>> {
        self.read(move |conn| SqliteRecordRepository::<T>::new(conn).list(limit, offset))
            .await
    }

    // -- Mutation queue ---------------------------------------------------

    /// Enqueue a mutation for a domain write the caller performed itself.
    pub async fn enqueue_mutation(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: MutationOperation,
        payload: serde_json::Value,
    ) -> Result<MutationId> {
        let max_retries = self.max_retries;
        let entity_id = entity_id.to_string();
        self.write(move |tx| {
            MutationQueue::new(tx).enqueue(entity_type, &entity_id, operation, &payload, max_retries)
        })
        .await
    }

    /// Claim up to `limit` entity heads that are due now.
    pub async fn claim_mutations(&self, limit: usize) -> Result<Vec<MutationEntry>> {
        self.write(move |tx| MutationQueue::new(tx).claim_next(limit, now_millis()))
            .await
    }

    /// Acknowledge an applied entry; `false` when it was already gone.
    pub async fn ack_mutation(&self, id: MutationId, remote_id: Option<&str>) -> Result<bool> {
        let remote_id = remote_id.map(ToString::to_string);
        self.write(move |tx| MutationQueue::new(tx).ack(id, remote_id.as_deref()))
            .await
    }

    /// Record a failed attempt; see [`MutationQueue::fail`].
    pub async fn fail_mutation(
        &self,
        id: MutationId,
        kind: FailureKind,
        message: &str,
        retry_delay: Duration,
    ) -> Result<Option<FailDisposition>> {
        let message = message.to_string();
        self.write(move |tx| {
            MutationQueue::new(tx).fail(id, kind, &message, retry_delay, now_millis())
        })
        .await
    }

    /// Return a claimed entry to `pending` without spending retry budget.
    pub async fn release_mutation(
        &self,
        id: MutationId,
        kind: Option<FailureKind>,
        message: Option<&str>,
    ) -> Result<bool> {
        let message = message.map(ToString::to_string);
        self.write(move |tx| MutationQueue::new(tx).release(id, kind, message.as_deref()))
            .await
    }

    /// Release several claimed entries at once.
    pub async fn release_mutations(&self, ids: Vec<MutationId>) -> Result<usize> {
        self.write(move |tx| MutationQueue::new(tx).release_many(&ids))
            .await
    }

    /// User retry of one entry.
    pub async fn retry_mutation(&self, id: MutationId) -> Result<bool> {
        self.write(move |tx| MutationQueue::new(tx).retry(id)).await
    }

    /// User retry of every failed entry.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        self.write(|tx| MutationQueue::new(tx).retry_all_failed())
            .await
    }

    /// User removal of an entry that is not in flight.
    pub async fn discard_mutation(&self, id: MutationId) -> Result<bool> {
        self.write(move |tx| MutationQueue::new(tx).discard(id)).await
    }

    pub async fn get_mutation(&self, id: MutationId) -> Result<Option<MutationEntry>> {
        self.read(move |conn| MutationQueue::new(conn).get(id)).await
    }

    pub async fn list_mutations(
        &self,
        status: Option<MutationStatus>,
        limit: usize,
    ) -> Result<Vec<MutationEntry>> {
        self.read(move |conn| MutationQueue::new(conn).list(status, limit))
            .await
    }

    pub async fn list_mutations_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<MutationEntry>> {
        let entity_id = entity_id.to_string();
        self.read(move |conn| MutationQueue::new(conn).list_for_entity(entity_type, &entity_id))
            .await
    }

    pub async fn mutation_counts(&self) -> Result<MutationCounts> {
        self.read(|conn| MutationQueue::new(conn).counts()).await
    }

    // -- Recognition queue ------------------------------------------------

    /// Queue a captured image for recognition.
    pub async fn enqueue_recognition(
        &self,
        image_path: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<RecognitionId> {
        let image_path = image_path.into();
        if image_path.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "image path cannot be empty".into(),
            ));
        }
        self.write(move |tx| RecognitionQueue::new(tx).enqueue(&image_path, metadata.as_ref()))
            .await
    }

    pub async fn claim_recognitions(&self, limit: usize) -> Result<Vec<RecognitionJob>> {
        self.write(move |tx| RecognitionQueue::new(tx).claim_next(limit))
            .await
    }

    pub async fn complete_recognition(
        &self,
        id: RecognitionId,
        result: serde_json::Value,
    ) -> Result<bool> {
        self.write(move |tx| RecognitionQueue::new(tx).complete(id, &result))
            .await
    }

    pub async fn fail_recognition(
        &self,
        id: RecognitionId,
        kind: FailureKind,
        message: &str,
    ) -> Result<bool> {
        let message = message.to_string();
        self.write(move |tx| RecognitionQueue::new(tx).fail(id, kind, &message))
            .await
    }

    pub async fn release_recognition(&self, id: RecognitionId) -> Result<bool> {
        self.write(move |tx| RecognitionQueue::new(tx).release(id))
            .await
    }

    /// User retry of an errored job.
    pub async fn retry_recognition(&self, id: RecognitionId) -> Result<bool> {
        self.write(move |tx| RecognitionQueue::new(tx).retry(id)).await
    }

    /// Requeue transient failures with attempts left.
    pub async fn requeue_retryable_recognitions(&self, max_attempts: u32) -> Result<usize> {
        self.write(move |tx| RecognitionQueue::new(tx).requeue_retryable(max_attempts))
            .await
    }

    pub async fn get_recognition(&self, id: RecognitionId) -> Result<Option<RecognitionJob>> {
        self.read(move |conn| RecognitionQueue::new(conn).get(id))
            .await
    }

    pub async fn list_recognitions(
        &self,
        status: Option<RecognitionStatus>,
        limit: usize,
    ) -> Result<Vec<RecognitionJob>> {
        self.read(move |conn| RecognitionQueue::new(conn).list(status, limit))
            .await
    }

    pub async fn recognition_counts(&self) -> Result<RecognitionCounts> {
        self.read(|conn| RecognitionQueue::new(conn).counts()).await
    }

    // -- Bookkeeping ------------------------------------------------------

    /// Reset `processing` rows in both queues older than `threshold`.
    ///
    /// A zero threshold resets every in-flight row, which is what a fresh
    /// process wants: nothing it owns can be in flight yet.
    pub async fn recover_stale_processing(&self, threshold: Duration) -> Result<StaleRecovery> {
        let cutoff = now_millis().saturating_sub(duration_millis(threshold));
        let recovery = self
            .write(move |tx| {
                Ok(StaleRecovery {
                    mutations: MutationQueue::new(tx).recover_stale(cutoff)?,
                    recognitions: RecognitionQueue::new(tx).recover_stale(cutoff)?,
                })
            })
            .await?;
        if recovery.mutations > 0 || recovery.recognitions > 0 {
            tracing::info!(
                "Recovered {} mutation(s) and {} recognition job(s) stuck in processing",
                recovery.mutations,
                recovery.recognitions
            );
        }
        Ok(recovery)
    }

    /// Mutation-only variant used at the start of each drain cycle.
    pub async fn recover_stale_mutations(&self, threshold: Duration) -> Result<usize> {
        let cutoff = now_millis().saturating_sub(duration_millis(threshold));
        self.write(move |tx| MutationQueue::new(tx).recover_stale(cutoff))
            .await
    }

    /// Recognition-only variant used at the start of each recognition cycle.
    pub async fn recover_stale_recognitions(&self, threshold: Duration) -> Result<usize> {
        let cutoff = now_millis().saturating_sub(duration_millis(threshold));
        self.write(move |tx| RecognitionQueue::new(tx).recover_stale(cutoff))
            .await
    }

    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        self.read(|conn| SqliteSyncMetaRepository::new(conn).last_sync_at())
            .await
    }

    /// Persist and publish the time of a completed drain.
    pub async fn set_last_sync_at(&self, at: i64) -> Result<()> {
        self.write(move |tx| SqliteSyncMetaRepository::new(tx).set_last_sync_at(at))
            .await?;
        self.state.set_last_sync_at(Some(at));
        Ok(())
    }
}
