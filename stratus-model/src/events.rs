use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event streams pulled from schedulers. Each stream is compacted into hourly
/// summaries after it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Replica,
    Validation,
    Retrieval,
}

impl EventKind {
    pub const ALL: [EventKind; 3] =
        [EventKind::Replica, EventKind::Validation, EventKind::Retrieval];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Replica => "replica",
            EventKind::Validation => "validation",
            EventKind::Retrieval => "retrieval",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReplicaStatus {
    #[default]
    Waiting,
    Pulling,
    Failed,
    Succeeded,
}

impl ReplicaStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ReplicaStatus::Succeeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReplicaStatus::Waiting => "waiting",
            ReplicaStatus::Pulling => "pulling",
            ReplicaStatus::Failed => "failed",
            ReplicaStatus::Succeeded => "succeeded",
        }
    }
}

/// A node caching (replicating) an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicaEvent {
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "CID", default)]
    pub cid: String,
    pub hash: String,
    #[serde(default)]
    pub status: ReplicaStatus,
    #[serde(default)]
    pub done_size: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ValidationStatus {
    #[default]
    Creating,
    Success,
    Timeout,
    Cancel,
    Other,
}

impl ValidationStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ValidationStatus::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Creating => "creating",
            ValidationStatus::Success => "success",
            ValidationStatus::Timeout => "timeout",
            ValidationStatus::Cancel => "cancel",
            ValidationStatus::Other => "other",
        }
    }
}

/// Outcome of one validator probing one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidationResult {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "ValidatorID")]
    pub validator_id: String,
    #[serde(rename = "CID", default)]
    pub cid: String,
    #[serde(default)]
    pub status: ValidationStatus,
    #[serde(default)]
    pub bandwidth: f64,
    /// Seconds.
    #[serde(default)]
    pub duration: i64,
    pub created_time: DateTime<Utc>,
}

/// A client downloading data from a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetrievalEvent {
    #[serde(rename = "TokenID")]
    pub token_id: String,
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "ClientID", default)]
    pub client_id: String,
    #[serde(rename = "CID", default)]
    pub cid: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub succeeded: bool,
    pub created_time: DateTime<Utc>,
}
