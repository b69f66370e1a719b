//! Remote gateway contract.
//!
//! The backend is opaque: the engines only see typed [`Outcome`]s. Transport
//! details (HTTP status codes, timeouts) are classified by the implementation.

mod http;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{
    EntityType, FailureKind, MutationEntry, MutationOperation, RecognitionJob,
};

pub use http::{classify_status, HttpRemoteGateway, StatusClass};

/// Permanent failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    Auth,
    Validation,
    Conflict,
    Rejected,
}

impl FatalKind {
    pub const fn failure_kind(self) -> FailureKind {
        match self {
            Self::Auth => FailureKind::Auth,
            Self::Validation => FailureKind::Validation,
            Self::Conflict => FailureKind::Conflict,
            Self::Rejected => FailureKind::Rejected,
        }
    }
}

/// Result of one remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    /// Network error, timeout, 5xx or rate limiting; worth trying again later
    RetryableFailure(String),
    FatalFailure(FatalKind, String),
}

impl<T> Outcome<T> {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure class to persist on the queue entry, `None` on success
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::RetryableFailure(_) => Some(FailureKind::Network),
            Self::FatalFailure(kind, _) => Some(kind.failure_kind()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::RetryableFailure(reason) => Outcome::RetryableFailure(reason),
            Self::FatalFailure(kind, reason) => Outcome::FatalFailure(kind, reason),
        }
    }
}

impl<T> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => f.write_str("success"),
            Self::RetryableFailure(reason) => write!(f, "retryable failure: {reason}"),
            Self::FatalFailure(kind, reason) => {
                write!(f, "{} failure: {reason}", kind.failure_kind())
            }
        }
    }
}

/// One mutation as sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationRequest {
    /// Stable across retries of the same queue entry
    pub idempotency_key: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: MutationOperation,
    pub payload: serde_json::Value,
    /// Attempt number, starting at 1
    pub attempt: u32,
}

impl From<&MutationEntry> for MutationRequest {
    fn from(entry: &MutationEntry) -> Self {
        Self {
            idempotency_key: format!("mutation-{}", entry.id),
            entity_type: entry.entity_type,
            entity_id: entry.entity_id.clone(),
            operation: entry.operation,
            payload: entry.payload.clone(),
            attempt: entry.retry_count.saturating_add(1),
        }
    }
}

/// One recognition submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognitionRequest {
    pub idempotency_key: String,
    pub image_path: String,
    pub metadata: Option<serde_json::Value>,
}

impl From<&RecognitionJob> for RecognitionRequest {
    fn from(job: &RecognitionJob) -> Self {
        Self {
            idempotency_key: format!("recognition-{}", job.id),
            image_path: job.image_path.clone(),
            metadata: job.metadata.clone(),
        }
    }
}

/// Backend operations used by the engines.
///
/// Implementations must never panic on transport errors; every failure is
/// reported as an [`Outcome`].
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Apply one mutation; success may carry the backend's id for the record
    async fn apply_mutation(&self, request: &MutationRequest) -> Outcome<Option<String>>;

    /// Submit an image for pest recognition; success carries the detections
    async fn submit_recognition(&self, request: &RecognitionRequest)
        -> Outcome<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MutationId, MutationStatus};

    #[test]
    fn failure_kind_follows_outcome() {
        assert_eq!(Outcome::Success(()).failure_kind(), None);
        assert_eq!(
            Outcome::<()>::RetryableFailure("timeout".into()).failure_kind(),
            Some(FailureKind::Network)
        );
        assert_eq!(
            Outcome::<()>::FatalFailure(FatalKind::Conflict, "stale".into()).failure_kind(),
            Some(FailureKind::Conflict)
        );
    }

    #[test]
    fn mutation_request_uses_entry_id_as_idempotency_key() {
        let entry = MutationEntry {
            id: MutationId(17),
            entity_type: EntityType::Praga,
            entity_id: "p1".into(),
            operation: MutationOperation::Update,
            payload: serde_json::json!({"quantity": 4}),
            status: MutationStatus::Processing,
            retry_count: 2,
            max_retries: 5,
            error_kind: None,
            error_message: None,
            next_retry_at: None,
            created_at: 0,
            updated_at: 0,
        };

        let request = MutationRequest::from(&entry);
        assert_eq!(request.idempotency_key, "mutation-17");
        assert_eq!(request.attempt, 3);
        assert_eq!(request.payload["quantity"], 4);
    }
}
