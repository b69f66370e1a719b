//! Recognition job model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::failure::FailureKind;
use crate::error::Error;

/// Identifier of a recognition queue row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecognitionId(pub i64);

impl fmt::Display for RecognitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecognitionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("invalid recognition id '{s}'")))
    }
}

/// Lifecycle state of a recognition job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl RecognitionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RecognitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecognitionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!(
                "unknown recognition status '{other}'"
            ))),
        }
    }
}

/// An asynchronous pest-identification job for a captured photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionJob {
    pub id: RecognitionId,
    /// Local path of the captured image
    pub image_path: String,
    /// Optional context: location, target entity
    pub metadata: Option<serde_json::Value>,
    pub status: RecognitionStatus,
    /// Number of submissions made so far
    pub attempts: u32,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    /// Detection output returned by the backend
    pub result: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RecognitionJob {
    /// Whether the job still counts toward the pending badge
    pub const fn is_pending(&self) -> bool {
        matches!(
            self.status,
            RecognitionStatus::Pending | RecognitionStatus::Processing
        )
    }
}
