//! Durable recognition job queue

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use super::{parse_optional_text_column, parse_text_column};
use crate::error::Result;
use crate::models::{FailureKind, RecognitionId, RecognitionJob, RecognitionStatus};
use crate::util::now_millis;

const SELECT_JOB: &str = "SELECT id, image_path, metadata, status, attempts, error_kind,
        error_message, result, created_at, updated_at
     FROM recognition_queue";

/// Number of jobs per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecognitionCounts {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub error: u64,
}

impl RecognitionCounts {
    /// Jobs the user is still waiting on
    pub const fn outstanding(&self) -> u64 {
        self.pending + self.processing
    }
}

/// Recognition queue operations over a borrowed connection (or transaction)
pub struct RecognitionQueue<'a> {
    conn: &'a Connection,
}

impl<'a> RecognitionQueue<'a> {
    /// Create a new queue accessor with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecognitionJob> {
        Ok(RecognitionJob {
            id: RecognitionId(row.get(0)?),
            image_path: row.get(1)?,
            metadata: row.get(2)?,
            status: parse_text_column(row, 3)?,
            attempts: row.get(4)?,
            error_kind: parse_optional_text_column(row, 5)?,
            error_message: row.get(6)?,
            result: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    /// Queue a captured image for recognition
    pub fn enqueue(
        &self,
        image_path: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<RecognitionId> {
        let now = now_millis();
        self.conn.execute(
            "INSERT INTO recognition_queue
                (image_path, metadata, status, attempts, created_at, updated_at)
             VALUES (?, ?, 'pending', 0, ?, ?)",
            params![image_path, metadata, now, now],
        )?;
        Ok(RecognitionId(self.conn.last_insert_rowid()))
    }

    /// Get a job by ID
    pub fn get(&self, id: RecognitionId) -> Result<Option<RecognitionJob>> {
        let job = self
            .conn
            .query_row(
                &format!("{SELECT_JOB} WHERE id = ?"),
                params![id.0],
                Self::parse_job,
            )
            .optional()?;
        Ok(job)
    }

    /// List jobs oldest first, optionally filtered by status
    pub fn list(
        &self,
        status: Option<RecognitionStatus>,
        limit: usize,
    ) -> Result<Vec<RecognitionJob>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_JOB}
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at, id
             LIMIT ?2"
        ))?;

        let jobs = stmt
            .query_map(
                params![status.map(RecognitionStatus::as_str), limit as i64],
                Self::parse_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    /// Claim up to `limit` pending jobs, oldest first; each claim is one attempt
    pub fn claim_next(&self, limit: usize) -> Result<Vec<RecognitionJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = {
            let mut stmt = self.conn.prepare(
                "SELECT id FROM recognition_queue
                 WHERE status = 'pending'
                 ORDER BY created_at, id
                 LIMIT ?",
            )?;
            let ids = stmt
                .query_map(params![limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut values: Vec<i64> = vec![now_millis()];
        values.extend(&ids);
        self.conn.execute(
            &format!(
                "UPDATE recognition_queue
                 SET status = 'processing', attempts = attempts + 1, updated_at = ?
                 WHERE id IN ({placeholders})"
            ),
            params_from_iter(values),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_JOB} WHERE id IN ({placeholders}) ORDER BY created_at, id"
        ))?;
        let jobs = stmt
            .query_map(params_from_iter(&ids), Self::parse_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    /// Store the detection output and mark the job `done`
    pub fn complete(&self, id: RecognitionId, result: &serde_json::Value) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE recognition_queue
             SET status = 'done', result = ?, error_kind = NULL, error_message = NULL,
                 updated_at = ?
             WHERE id = ? AND status != 'done'",
            params![result, now_millis(), id.0],
        )?;
        Ok(rows > 0)
    }

    /// Mark the current attempt as failed
    pub fn fail(&self, id: RecognitionId, kind: FailureKind, message: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE recognition_queue
             SET status = 'error', error_kind = ?, error_message = ?, updated_at = ?
             WHERE id = ? AND status != 'done'",
            params![kind.as_str(), message, now_millis(), id.0],
        )?;
        Ok(rows > 0)
    }

    /// Give an unfinished attempt back (cancellation)
    pub fn release(&self, id: RecognitionId) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE recognition_queue
             SET status = 'pending', attempts = MAX(attempts - 1, 0), updated_at = ?
             WHERE id = ? AND status = 'processing'",
            params![now_millis(), id.0],
        )?;
        Ok(rows > 0)
    }

    /// User retry: start over with a fresh attempt budget
    pub fn retry(&self, id: RecognitionId) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE recognition_queue
             SET status = 'pending', attempts = 0, error_kind = NULL, error_message = NULL,
                 updated_at = ?
             WHERE id = ? AND status = 'error'",
            params![now_millis(), id.0],
        )?;
        Ok(rows > 0)
    }

    /// Requeue jobs that failed for a transient reason and have attempts left
    pub fn requeue_retryable(&self, max_attempts: u32) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE recognition_queue
             SET status = 'pending', updated_at = ?
             WHERE status = 'error' AND error_kind = ? AND attempts < ?",
            params![now_millis(), FailureKind::Network.as_str(), max_attempts],
        )?;
        Ok(rows)
    }

    /// Reset `processing` jobs last touched at or before `cutoff` to `pending`
    pub fn recover_stale(&self, cutoff: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE recognition_queue
             SET status = 'pending', updated_at = ?
             WHERE status = 'processing' AND updated_at <= ?",
            params![now_millis(), cutoff],
        )?;
        Ok(rows)
    }

    /// Jobs per state
    pub fn counts(&self) -> Result<RecognitionCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM recognition_queue GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = RecognitionCounts::default();
        for (status, count) in rows {
            let count = count.unsigned_abs();
            match status.as_str() {
                "pending" => counts.pending = count,
                "processing" => counts.processing = count,
                "done" => counts.done = count,
                "error" => counts.error = count,
                _ => {}
            }
        }
        Ok(counts)
    }
}
