//! Mutation queue model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::failure::FailureKind;
use super::record::EntityType;
use crate::error::Error;

/// Identifier of a mutation queue row (monotonic, assigned at enqueue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(pub i64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("invalid mutation id '{s}'")))
    }
}

/// Remote operation to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    Create,
    Update,
    Delete,
}

impl MutationOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation '{other}'"))),
        }
    }
}

/// Lifecycle state of a mutation queue entry
///
/// `pending → processing → {synced | pending (retry) | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    Processing,
    Failed,
    Synced,
}

impl MutationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Synced => "synced",
        }
    }

    /// States that still need attention (counted by the pending badge)
    pub const fn is_unresolved(self) -> bool {
        !matches!(self, Self::Synced)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            "synced" => Ok(Self::Synced),
            other => Err(Error::InvalidInput(format!("unknown mutation status '{other}'"))),
        }
    }
}

/// One pending remote operation against a domain record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEntry {
    pub id: MutationId,
    pub entity_type: EntityType,
    /// Target record id (weak reference)
    pub entity_id: String,
    pub operation: MutationOperation,
    /// Serialized snapshot of the fields to apply
    pub payload: serde_json::Value,
    pub status: MutationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    /// Earliest time the entry may be claimed again (Unix ms); `None` means now
    pub next_retry_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MutationEntry {
    /// Whether the entry spent its whole retry budget
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Whether the entry can be claimed at `now_ms`
    pub fn is_eligible(&self, now_ms: i64) -> bool {
        self.status == MutationStatus::Pending && self.next_retry_at.is_none_or(|at| at <= now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: MutationStatus, next_retry_at: Option<i64>) -> MutationEntry {
        MutationEntry {
            id: MutationId(1),
            entity_type: EntityType::Scout,
            entity_id: "e1".into(),
            operation: MutationOperation::Create,
            payload: serde_json::json!({}),
            status,
            retry_count: 0,
            max_retries: 5,
            error_kind: None,
            error_message: None,
            next_retry_at,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn eligibility_respects_status_and_retry_time() {
        assert!(entry(MutationStatus::Pending, None).is_eligible(10));
        assert!(entry(MutationStatus::Pending, Some(10)).is_eligible(10));
        assert!(!entry(MutationStatus::Pending, Some(11)).is_eligible(10));
        assert!(!entry(MutationStatus::Processing, None).is_eligible(10));
        assert!(!entry(MutationStatus::Failed, None).is_eligible(10));
    }

    #[test]
    fn failed_entries_stay_unresolved() {
        assert!(MutationStatus::Failed.is_unresolved());
        assert!(!MutationStatus::Synced.is_unresolved());
    }

    #[test]
    fn mutation_id_parse_rejects_garbage() {
        assert_eq!("42".parse::<MutationId>().unwrap(), MutationId(42));
        assert!("abc".parse::<MutationId>().is_err());
    }
}
