use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored-asset record. `hash` is the natural key within an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetRecord {
    #[serde(rename = "CID")]
    pub cid: String,
    pub hash: String,
    #[serde(default)]
    pub total_size: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub replicas: i64,
    #[serde(default)]
    pub total_blocks: i64,
    pub created_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl AssetRecord {
    /// Two records describe the same asset version when hash and end time agree.
    pub fn same_version(&self, other: &AssetRecord) -> bool {
        self.hash == other.hash && self.end_time == other.end_time
    }
}
