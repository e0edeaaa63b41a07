use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state a scheduler reports for an edge or candidate device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NodeStatus {
    Online,
    #[default]
    Offline,
    Abnormal,
}

impl NodeStatus {
    pub fn is_online(self) -> bool {
        matches!(self, NodeStatus::Online)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Abnormal => "abnormal",
        }
    }
}

/// Device snapshot as returned by a scheduler's node listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeInfo {
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(rename = "ExternalIP", default)]
    pub external_ip: String,
    #[serde(default)]
    pub cpu_cores: i32,
    /// Bytes.
    #[serde(default)]
    pub memory: f64,
    /// Bytes.
    #[serde(default)]
    pub disk_space: f64,
    /// Percentage in `[0, 100]`.
    #[serde(default)]
    pub disk_usage: f64,
    #[serde(default)]
    pub bandwidth_up: i64,
    #[serde(default)]
    pub bandwidth_down: i64,
    /// Cumulative minutes online since registration.
    #[serde(default)]
    pub online_duration: i64,
    /// Cumulative reward.
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub download_traffic: i64,
    #[serde(default)]
    pub upload_traffic: i64,
    pub last_seen: DateTime<Utc>,
}

impl NodeInfo {
    pub fn is_online(&self) -> bool {
        self.status.is_online()
    }
}
