//! Classification of remote failures stored alongside queue entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Why the last remote attempt for a queue entry failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connectivity, timeout, 5xx or rate limiting
    Network,
    /// Session expired or forbidden; needs re-authentication
    Auth,
    /// Backend rejected the payload as invalid
    Validation,
    /// Remote record diverged from the local one
    Conflict,
    /// Any other permanent refusal
    Rejected,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
        }
    }

    /// Whether another attempt may succeed without user involvement
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(Self::Network),
            "auth" => Ok(Self::Auth),
            "validation" => Ok(Self::Validation),
            "conflict" => Ok(Self::Conflict),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::InvalidInput(format!("unknown failure kind '{other}'"))),
        }
    }
}
