//! Durable mutation queue

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use super::{parse_optional_text_column, parse_text_column};
use super::record_repository::{mark_entity_synced, set_entity_remote_id};
use crate::error::Result;
use crate::models::{
    EntityType, FailureKind, MutationEntry, MutationId, MutationOperation, MutationStatus,
};
use crate::util::{duration_millis, now_millis};

const SELECT_ENTRY: &str = "SELECT id, entity_type, entity_id, operation, payload, status,
        retry_count, max_retries, error_kind, error_message, next_retry_at,
        created_at, updated_at
     FROM mutation_queue";

/// Number of queue entries per unresolved state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MutationCounts {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
}

impl MutationCounts {
    /// Everything that still awaits the backend or the user
    pub const fn unresolved(&self) -> u64 {
        self.pending + self.processing + self.failed
    }
}

/// What `fail` did with an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailDisposition {
    /// Back to `pending`, eligible again at `next_retry_at`
    Rescheduled(MutationEntry),
    /// Terminal `failed`; waits for user retry or discard
    Failed(MutationEntry),
    /// Returned to `pending` without spending retry budget
    Released(MutationEntry),
}

impl FailDisposition {
    pub const fn entry(&self) -> &MutationEntry {
        match self {
            Self::Rescheduled(entry) | Self::Failed(entry) | Self::Released(entry) => entry,
        }
    }
}

/// Queue operations over a borrowed connection (or transaction)
pub struct MutationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> MutationQueue<'a> {
    /// Create a new queue accessor with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MutationEntry> {
        Ok(MutationEntry {
            id: MutationId(row.get(0)?),
            entity_type: parse_text_column(row, 1)?,
            entity_id: row.get(2)?,
            operation: parse_text_column(row, 3)?,
            payload: row.get(4)?,
            status: parse_text_column(row, 5)?,
            retry_count: row.get(6)?,
            max_retries: row.get(7)?,
            error_kind: parse_optional_text_column(row, 8)?,
            error_message: row.get(9)?,
            next_retry_at: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    /// Append an entry; the caller's transaction covers the domain write.
    ///
    /// A `delete` supersedes earlier queued (`pending` or `failed`) entries of
    /// the same entity. An in-flight `processing` entry is left alone so the
    /// delete is applied after it.
    pub fn enqueue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: MutationOperation,
        payload: &serde_json::Value,
        max_retries: u32,
    ) -> Result<MutationId> {
        let now = now_millis();

        if operation == MutationOperation::Delete {
            let superseded = self.conn.execute(
                "DELETE FROM mutation_queue
                 WHERE entity_type = ? AND entity_id = ? AND status IN ('pending', 'failed')",
                params![entity_type.as_str(), entity_id],
            )?;
            if superseded > 0 {
                tracing::debug!(
                    "Delete of {entity_type} {entity_id} superseded {superseded} queued entries"
                );
            }
        }

        self.conn.execute(
            "INSERT INTO mutation_queue
                (entity_type, entity_id, operation, payload, status, retry_count,
                 max_retries, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'pending', 0, ?, ?, ?)",
            params![
                entity_type.as_str(),
                entity_id,
                operation.as_str(),
                payload,
                max_retries,
                now,
                now
            ],
        )?;

        Ok(MutationId(self.conn.last_insert_rowid()))
    }

    /// Queue a tombstone for an entity, or settle it locally.
    ///
    /// When the entity's `create` is still queued and was never attempted
    /// (and nothing of it is in flight), the backend has never seen the
    /// record: the queued entries are dropped, the tombstone is marked synced
    /// and `None` is returned. Otherwise this is `enqueue` with `Delete`.
    pub fn enqueue_delete(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        payload: &serde_json::Value,
        max_retries: u32,
    ) -> Result<Option<MutationId>> {
        if self.is_local_only(entity_type, entity_id)? {
            let dropped = self.conn.execute(
                "DELETE FROM mutation_queue WHERE entity_type = ? AND entity_id = ?",
                params![entity_type.as_str(), entity_id],
            )?;
            mark_entity_synced(self.conn, entity_type, entity_id, None)?;
            tracing::debug!(
                "Delete of unsent {entity_type} {entity_id} dropped {dropped} queued entries"
            );
            return Ok(None);
        }

        self.enqueue(
            entity_type,
            entity_id,
            MutationOperation::Delete,
            payload,
            max_retries,
        )
        .map(Some)
    }

    /// Whether the backend cannot know the entity yet.
    ///
    /// True when its `create` is still queued and either was never touched
    /// since enqueue or was refused outright, and nothing is in flight.
    fn is_local_only(&self, entity_type: EntityType, entity_id: &str) -> Result<bool> {
        let (unsent_creates, in_flight): (i64, i64) = self.conn.query_row(
            "SELECT
                COALESCE(SUM(operation = 'create' AND (
                    (status = 'pending' AND retry_count = 0 AND error_kind IS NULL
                        AND updated_at = created_at)
                    OR (status = 'failed' AND error_kind IN ('validation', 'rejected'))
                )), 0),
                COALESCE(SUM(status = 'processing'), 0)
             FROM mutation_queue
             WHERE entity_type = ? AND entity_id = ?",
            params![entity_type.as_str(), entity_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(unsent_creates > 0 && in_flight == 0)
    }

    /// Get an entry by ID
    pub fn get(&self, id: MutationId) -> Result<Option<MutationEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("{SELECT_ENTRY} WHERE id = ?"),
                params![id.0],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// List entries in queue order, optionally filtered by status
    pub fn list(&self, status: Option<MutationStatus>, limit: usize) -> Result<Vec<MutationEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_ENTRY}
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at, id
             LIMIT ?2"
        ))?;

        let entries = stmt
            .query_map(
                params![status.map(MutationStatus::as_str), limit as i64],
                Self::parse_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    /// All entries of one entity, in apply order
    pub fn list_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<MutationEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_ENTRY}
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY created_at, id"
        ))?;

        let entries = stmt
            .query_map(params![entity_type.as_str(), entity_id], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    /// Claim up to `limit` entity heads that are due at `now`.
    ///
    /// A head is the earliest unresolved entry of its entity. Entities that
    /// already have an entry in `processing` are skipped, so a single call
    /// never returns two entries of the same entity.
    pub fn claim_next(&self, limit: usize, now: i64) -> Result<Vec<MutationEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = {
            let mut stmt = self.conn.prepare(
                "SELECT q.id FROM mutation_queue q
                 WHERE q.status = 'pending'
                   AND (q.next_retry_at IS NULL OR q.next_retry_at <= ?1)
                   AND NOT EXISTS (
                       SELECT 1 FROM mutation_queue e
                       WHERE e.entity_type = q.entity_type
                         AND e.entity_id = q.entity_id
                         AND e.id != q.id
                         AND (
                             e.status = 'processing'
                             OR (
                                 e.status IN ('pending', 'failed')
                                 AND (e.created_at < q.created_at
                                      OR (e.created_at = q.created_at AND e.id < q.id))
                             )
                         )
                   )
                 ORDER BY q.created_at, q.id
                 LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(params![now, limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut values: Vec<i64> = vec![now];
        values.extend(&ids);
        self.conn.execute(
            &format!(
                "UPDATE mutation_queue SET status = 'processing', updated_at = ?
                 WHERE id IN ({placeholders})"
            ),
            params_from_iter(values),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_ENTRY} WHERE id IN ({placeholders}) ORDER BY created_at, id"
        ))?;
        let entries = stmt
            .query_map(params_from_iter(&ids), Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    /// Remove an applied entry.
    ///
    /// The entity is marked synced once no other entry of it remains. Acking
    /// an entry that is already gone is a no-op and returns `false`.
    pub fn ack(&self, id: MutationId, remote_id: Option<&str>) -> Result<bool> {
        let Some(entry) = self.get(id)? else {
            return Ok(false);
        };

        self.conn
            .execute("DELETE FROM mutation_queue WHERE id = ?", params![id.0])?;

        if self.remaining_for_entity(entry.entity_type, &entry.entity_id)? == 0 {
            mark_entity_synced(self.conn, entry.entity_type, &entry.entity_id, remote_id)?;
        } else if let Some(remote_id) = remote_id {
            set_entity_remote_id(self.conn, entry.entity_type, &entry.entity_id, remote_id)?;
        }

        Ok(true)
    }

    /// Record a failed attempt.
    ///
    /// Retryable kinds spend one retry: the entry goes back to `pending` with
    /// `next_retry_at = now + retry_delay`, or to `failed` once the budget is
    /// exhausted. `Auth` releases the entry without spending budget. Every
    /// other kind is terminal.
    pub fn fail(
        &self,
        id: MutationId,
        kind: FailureKind,
        message: &str,
        retry_delay: Duration,
        now: i64,
    ) -> Result<Option<FailDisposition>> {
        let Some(entry) = self.get(id)? else {
            return Ok(None);
        };

        if kind == FailureKind::Auth {
            self.release(id, Some(kind), Some(message))?;
            return Ok(self.get(id)?.map(FailDisposition::Released));
        }

        let (status, retry_count, next_retry_at) = if kind.is_retryable() {
            let retry_count = entry.retry_count.saturating_add(1).min(entry.max_retries);
            if retry_count < entry.max_retries {
                (
                    MutationStatus::Pending,
                    retry_count,
                    Some(now.saturating_add(duration_millis(retry_delay))),
                )
            } else {
                (MutationStatus::Failed, retry_count, None)
            }
        } else {
            (MutationStatus::Failed, entry.retry_count, None)
        };

        self.conn.execute(
            "UPDATE mutation_queue
             SET status = ?, retry_count = ?, error_kind = ?, error_message = ?,
                 next_retry_at = ?, updated_at = ?
             WHERE id = ?",
            params![
                status.as_str(),
                retry_count,
                kind.as_str(),
                message,
                next_retry_at,
                now,
                id.0
            ],
        )?;

        let Some(updated) = self.get(id)? else {
            return Ok(None);
        };
        Ok(Some(if status == MutationStatus::Pending {
            FailDisposition::Rescheduled(updated)
        } else {
            FailDisposition::Failed(updated)
        }))
    }

    /// Return a `processing` entry to `pending` without touching its retry count
    pub fn release(
        &self,
        id: MutationId,
        kind: Option<FailureKind>,
        message: Option<&str>,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE mutation_queue
             SET status = 'pending', next_retry_at = NULL,
                 error_kind = COALESCE(?, error_kind),
                 error_message = COALESCE(?, error_message),
                 updated_at = ?
             WHERE id = ? AND status = 'processing'",
            params![kind.map(FailureKind::as_str), message, now_millis(), id.0],
        )?;
        Ok(rows > 0)
    }

    /// Release several entries; returns how many were still `processing`
    pub fn release_many(&self, ids: &[MutationId]) -> Result<usize> {
        let mut released = 0;
        for id in ids {
            if self.release(*id, None, None)? {
                released += 1;
            }
        }
        Ok(released)
    }

    /// User retry: reset the budget and make the entry eligible now
    pub fn retry(&self, id: MutationId) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE mutation_queue
             SET status = 'pending', retry_count = 0, next_retry_at = NULL,
                 error_kind = NULL, error_message = NULL, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'failed')",
            params![now_millis(), id.0],
        )?;
        Ok(rows > 0)
    }

    /// User retry of every terminal entry
    pub fn retry_all_failed(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE mutation_queue
             SET status = 'pending', retry_count = 0, next_retry_at = NULL,
                 error_kind = NULL, error_message = NULL, updated_at = ?
             WHERE status = 'failed'",
            params![now_millis()],
        )?;
        Ok(rows)
    }

    /// User discards an entry that is not in flight
    pub fn discard(&self, id: MutationId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM mutation_queue WHERE id = ? AND status IN ('pending', 'failed')",
            params![id.0],
        )?;
        Ok(rows > 0)
    }

    /// Reset `processing` rows last touched at or before `cutoff` to `pending`
    pub fn recover_stale(&self, cutoff: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE mutation_queue
             SET status = 'pending', next_retry_at = NULL, updated_at = ?
             WHERE status = 'processing' AND updated_at <= ?",
            params![now_millis(), cutoff],
        )?;
        Ok(rows)
    }

    /// Unresolved entries still queued for an entity
    pub fn remaining_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM mutation_queue WHERE entity_type = ? AND entity_id = ?",
            params![entity_type.as_str(), entity_id],
            |row| row.get(0),
        )?;
        Ok(count.unsigned_abs())
    }

    /// Entries per state
    pub fn counts(&self) -> Result<MutationCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM mutation_queue GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = MutationCounts::default();
        for (status, count) in rows {
            let count = count.unsigned_abs();
            match status.as_str() {
                "pending" => counts.pending = count,
                "processing" => counts.processing = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::{is_entity_synced, RecordRepository, SqliteRecordRepository};
    use crate::models::Scout;
    use crate::models::{RecordId, SyncRecord};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const NO_DELAY: Duration = Duration::ZERO;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn enqueue(queue: &MutationQueue<'_>, entity_id: &str, operation: MutationOperation) -> MutationId {
        queue
            .enqueue(EntityType::Scout, entity_id, operation, &json!({"id": entity_id}), 5)
            .unwrap()
    }

    fn far_future() -> i64 {
        now_millis() + 60_000
    }

    #[test]
    fn test_enqueue_and_get() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let id = enqueue(&queue, "e1", MutationOperation::Create);
        let entry = queue.get(id).unwrap().unwrap();

        assert_eq!(entry.status, MutationStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.max_retries, 5);
        assert_eq!(entry.payload, json!({"id": "e1"}));
        assert_eq!(entry.next_retry_at, None);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let first = enqueue(&queue, "e1", MutationOperation::Create);
        let second = enqueue(&queue, "e2", MutationOperation::Create);
        assert!(second > first);
    }

    #[test]
    fn test_claim_returns_one_head_per_entity() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let create = enqueue(&queue, "e1", MutationOperation::Create);
        let _update = enqueue(&queue, "e1", MutationOperation::Update);
        let other = enqueue(&queue, "e2", MutationOperation::Create);

        let claimed = queue.claim_next(10, far_future()).unwrap();
        let ids: Vec<_> = claimed.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![create, other]);
        assert!(claimed
            .iter()
            .all(|entry| entry.status == MutationStatus::Processing));

        // Heads are in flight; nothing else is claimable
        assert!(queue.claim_next(10, far_future()).unwrap().is_empty());
    }

    #[test]
    fn test_claim_respects_limit_and_order() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let first = enqueue(&queue, "e1", MutationOperation::Create);
        enqueue(&queue, "e2", MutationOperation::Create);
        enqueue(&queue, "e3", MutationOperation::Create);

        let claimed = queue.claim_next(1, far_future()).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first);
    }

    #[test]
    fn test_claim_skips_entries_not_yet_due() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let id = enqueue(&queue, "e1", MutationOperation::Create);
        queue.claim_next(10, far_future()).unwrap();
        let now = now_millis();
        queue
            .fail(id, FailureKind::Network, "timeout", Duration::from_secs(30), now)
            .unwrap();

        assert!(queue.claim_next(10, now).unwrap().is_empty());
        assert_eq!(queue.claim_next(10, now + 30_000).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_head_blocks_later_entries() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let create = enqueue(&queue, "e1", MutationOperation::Create);
        let update = enqueue(&queue, "e1", MutationOperation::Update);
        queue.claim_next(10, far_future()).unwrap();
        queue
            .fail(create, FailureKind::Validation, "bad latitude", NO_DELAY, now_millis())
            .unwrap();

        assert!(queue.claim_next(10, far_future()).unwrap().is_empty());

        assert!(queue.discard(create).unwrap());
        let claimed = queue.claim_next(10, far_future()).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, update);
    }

    #[test]
    fn test_ack_marks_entity_synced_when_queue_drained() {
        let db = setup();
        let repo = SqliteRecordRepository::<Scout>::new(db.connection());
        let queue = MutationQueue::new(db.connection());

        let scout = Scout::new(RecordId::new(), -12.0, -55.0);
        repo.insert(&scout).unwrap();
        let entity_id = scout.id().as_str();
        let create = queue
            .enqueue(EntityType::Scout, &entity_id, MutationOperation::Create, &json!({}), 5)
            .unwrap();
        let update = queue
            .enqueue(EntityType::Scout, &entity_id, MutationOperation::Update, &json!({}), 5)
            .unwrap();

        queue.claim_next(10, far_future()).unwrap();
        assert!(queue.ack(create, Some("srv-7")).unwrap());
        let fetched = repo.get(&scout.meta.id).unwrap().unwrap();
        assert!(!fetched.meta.synced);
        assert_eq!(fetched.meta.remote_id.as_deref(), Some("srv-7"));

        queue.claim_next(10, far_future()).unwrap();
        assert!(queue.ack(update, None).unwrap());
        let fetched = repo.get(&scout.meta.id).unwrap().unwrap();
        assert!(fetched.meta.synced);
        assert_eq!(fetched.meta.remote_id.as_deref(), Some("srv-7"));
    }

    #[test]
    fn test_ack_is_idempotent() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let id = enqueue(&queue, "e1", MutationOperation::Create);
        assert!(queue.ack(id, None).unwrap());
        assert!(!queue.ack(id, None).unwrap());
        assert_eq!(queue.counts().unwrap(), MutationCounts::default());
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let id = queue
            .enqueue(EntityType::Scout, "e1", MutationOperation::Create, &json!({}), 3)
            .unwrap();

        let mut last = None;
        for _ in 0..3 {
            let claimed = queue.claim_next(10, far_future()).unwrap();
            assert_eq!(claimed.len(), 1);
            last = queue
                .fail(id, FailureKind::Network, "offline", NO_DELAY, now_millis())
                .unwrap();
        }

        let Some(FailDisposition::Failed(entry)) = last else {
            panic!("expected terminal failure, got {last:?}");
        };
        assert_eq!(entry.retry_count, 3);
        assert_eq!(entry.status, MutationStatus::Failed);
        assert!(queue.claim_next(10, far_future()).unwrap().is_empty());

        // Failing a terminal entry again never exceeds the budget
        queue
            .fail(id, FailureKind::Network, "offline", NO_DELAY, now_millis())
            .unwrap();
        assert_eq!(queue.get(id).unwrap().unwrap().retry_count, 3);
    }

    #[test]
    fn test_fatal_failure_keeps_retry_count() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let id = enqueue(&queue, "e1", MutationOperation::Create);
        queue.claim_next(10, far_future()).unwrap();
        let disposition = queue
            .fail(id, FailureKind::Conflict, "version mismatch", NO_DELAY, now_millis())
            .unwrap()
            .unwrap();

        let entry = disposition.entry();
        assert!(matches!(disposition, FailDisposition::Failed(_)));
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.error_kind, Some(FailureKind::Conflict));
        assert_eq!(entry.error_message.as_deref(), Some("version mismatch"));
    }

    #[test]
    fn test_auth_failure_releases_without_spending_budget() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let id = enqueue(&queue, "e1", MutationOperation::Create);
        queue.claim_next(10, far_future()).unwrap();
        let disposition = queue
            .fail(id, FailureKind::Auth, "token expired", NO_DELAY, now_millis())
            .unwrap()
            .unwrap();

        assert!(matches!(disposition, FailDisposition::Released(_)));
        let entry = disposition.entry();
        assert_eq!(entry.status, MutationStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.error_kind, Some(FailureKind::Auth));
    }

    #[test]
    fn test_retry_resets_failed_entries() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let id = queue
            .enqueue(EntityType::Scout, "e1", MutationOperation::Create, &json!({}), 1)
            .unwrap();
        queue.claim_next(10, far_future()).unwrap();
        queue
            .fail(id, FailureKind::Network, "offline", NO_DELAY, now_millis())
            .unwrap();
        assert_eq!(queue.counts().unwrap().failed, 1);

        assert_eq!(queue.retry_all_failed().unwrap(), 1);
        let entry = queue.get(id).unwrap().unwrap();
        assert_eq!(entry.status, MutationStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.error_kind, None);
        assert_eq!(entry.next_retry_at, None);
    }

    #[test]
    fn test_delete_supersedes_queued_entries() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let create = enqueue(&queue, "e1", MutationOperation::Create);
        queue.claim_next(10, far_future()).unwrap();
        enqueue(&queue, "e1", MutationOperation::Update);
        enqueue(&queue, "e2", MutationOperation::Create);
        let delete = enqueue(&queue, "e1", MutationOperation::Delete);

        let ids: Vec<_> = queue
            .list_for_entity(EntityType::Scout, "e1")
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        // The in-flight create survives; the queued update is gone
        assert_eq!(ids, vec![create, delete]);
        assert_eq!(queue.list(None, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_delete_of_unsent_record_stays_local() {
        let db = setup();
        let repo = SqliteRecordRepository::<Scout>::new(db.connection());
        let queue = MutationQueue::new(db.connection());

        let scout = Scout::new(RecordId::new(), -12.0, -55.0);
        repo.insert(&scout).unwrap();
        let entity_id = scout.id().as_str();
        queue
            .enqueue(EntityType::Scout, &entity_id, MutationOperation::Create, &json!({}), 5)
            .unwrap();
        queue
            .enqueue(EntityType::Scout, &entity_id, MutationOperation::Update, &json!({}), 5)
            .unwrap();

        let delete = queue
            .enqueue_delete(EntityType::Scout, &entity_id, &json!({"id": entity_id}), 5)
            .unwrap();

        assert_eq!(delete, None);
        assert_eq!(queue.counts().unwrap(), MutationCounts::default());
        assert_eq!(
            is_entity_synced(db.connection(), EntityType::Scout, &entity_id).unwrap(),
            Some(true)
        );
    }

    #[test]
    fn test_delete_of_refused_create_stays_local() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let create = enqueue(&queue, "e1", MutationOperation::Create);
        queue.claim_next(10, far_future()).unwrap();
        queue
            .fail(create, FailureKind::Validation, "missing name", NO_DELAY, now_millis())
            .unwrap();

        let delete = queue
            .enqueue_delete(EntityType::Scout, "e1", &json!({}), 5)
            .unwrap();
        assert_eq!(delete, None);
        assert!(queue.list_for_entity(EntityType::Scout, "e1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_after_an_attempt_is_sent() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        // A timed out create may have reached the backend
        let create = enqueue(&queue, "e1", MutationOperation::Create);
        queue.claim_next(10, far_future()).unwrap();
        queue
            .fail(create, FailureKind::Network, "timed out", NO_DELAY, now_millis())
            .unwrap();
        let delete = queue
            .enqueue_delete(EntityType::Scout, "e1", &json!({}), 5)
            .unwrap()
            .unwrap();
        let entries = queue.list_for_entity(EntityType::Scout, "e1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, delete);

        // So may one that is in flight right now
        let create = enqueue(&queue, "e2", MutationOperation::Create);
        queue.claim_next(10, far_future()).unwrap();
        let delete = queue
            .enqueue_delete(EntityType::Scout, "e2", &json!({}), 5)
            .unwrap()
            .unwrap();
        let ids: Vec<_> = queue
            .list_for_entity(EntityType::Scout, "e2")
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![create, delete]);
    }

    #[test]
    fn test_recover_stale_processing() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let id = enqueue(&queue, "e1", MutationOperation::Create);
        queue.claim_next(10, far_future()).unwrap();

        // Too recent for an old cutoff
        assert_eq!(queue.recover_stale(0).unwrap(), 0);
        assert_eq!(queue.recover_stale(far_future()).unwrap(), 1);

        let entry = queue.get(id).unwrap().unwrap();
        assert_eq!(entry.status, MutationStatus::Pending);
        assert_eq!(queue.claim_next(10, far_future()).unwrap().len(), 1);
    }

    #[test]
    fn test_release_many_only_touches_processing() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let claimed_id = enqueue(&queue, "e1", MutationOperation::Create);
        let idle_id = enqueue(&queue, "e2", MutationOperation::Create);
        queue.claim_next(1, far_future()).unwrap();

        assert_eq!(queue.release_many(&[claimed_id, idle_id]).unwrap(), 1);
        assert_eq!(queue.counts().unwrap().pending, 2);
    }

    #[test]
    fn test_counts() {
        let db = setup();
        let queue = MutationQueue::new(db.connection());

        let failing = enqueue(&queue, "e1", MutationOperation::Create);
        enqueue(&queue, "e2", MutationOperation::Create);
        enqueue(&queue, "e3", MutationOperation::Create);
        queue.claim_next(2, far_future()).unwrap();
        queue
            .fail(failing, FailureKind::Rejected, "gone", NO_DELAY, now_millis())
            .unwrap();

        let counts = queue.counts().unwrap();
        assert_eq!(
            counts,
            MutationCounts {
                pending: 1,
                processing: 1,
                failed: 1,
            }
        );
        assert_eq!(counts.unresolved(), 3);
    }
}
