use serde::{Deserialize, Serialize};

/// Counters a scheduler keeps for its whole area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfo {
    #[serde(default)]
    pub candidate_count: i64,
    #[serde(default)]
    pub edge_count: i64,
    #[serde(default)]
    pub online_count: i64,
    #[serde(default)]
    pub asset_count: i64,
    /// Bytes.
    #[serde(default)]
    pub storage_used: f64,
    /// Bytes.
    #[serde(default)]
    pub storage_total: f64,
    #[serde(default)]
    pub upload_bandwidth: f64,
    #[serde(default)]
    pub download_bandwidth: f64,
}
