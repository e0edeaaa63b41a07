//! Persistence contract used by fetcher jobs.
//!
//! Every write is an insert-or-update keyed by natural identity, because jobs
//! from different fetchers and schedulers land in no particular order and a
//! failed tick is simply re-run from the last persisted mark.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::*;
#[cfg(feature = "postgres")]
pub use postgres::*;

use std::{
    collections::{HashMap, hash_map::Entry},
    hash::Hash,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use stratus_model::{
    AreaId, AssetRecord, EventKind, NodeInfo, ReplicaEvent, RetrievalEvent, SchedulerId,
    SystemInfo, ValidationResult,
};

use crate::error::Result;

/// Per-device hourly snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub area_id: AreaId,
    pub hour: DateTime<Utc>,
    pub online_duration: i64,
    pub profit: f64,
    pub disk_usage: f64,
    pub upload_traffic: i64,
    pub download_traffic: i64,
}

impl DeviceSnapshot {
    pub fn from_node(area_id: &AreaId, node: &NodeInfo, at: DateTime<Utc>) -> Self {
        Self {
            device_id: node.node_id.clone(),
            area_id: area_id.clone(),
            hour: hour_bucket(at),
            online_duration: node.online_duration,
            profit: node.profit,
            disk_usage: node.disk_usage,
            upload_traffic: node.upload_traffic,
            download_traffic: node.download_traffic,
        }
    }
}

/// Raw event rows of one kind, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub enum EventRows {
    Replica(Vec<ReplicaEvent>),
    Validation(Vec<ValidationResult>),
    Retrieval(Vec<RetrievalEvent>),
}

impl EventRows {
    pub fn kind(&self) -> EventKind {
        match self {
            EventRows::Replica(_) => EventKind::Replica,
            EventRows::Validation(_) => EventKind::Validation,
            EventRows::Retrieval(_) => EventKind::Retrieval,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EventRows::Replica(rows) => rows.len(),
            EventRows::Validation(rows) => rows.len(),
            EventRows::Retrieval(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creation time of the newest row.
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        match self {
            EventRows::Replica(rows) => rows.iter().map(|r| r.created_time).max(),
            EventRows::Validation(rows) => rows.iter().map(|r| r.created_time).max(),
            EventRows::Retrieval(rows) => rows.iter().map(|r| r.created_time).max(),
        }
    }
}

/// What one compaction pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionStats {
    pub buckets: u64,
    pub deleted: u64,
}

/// Network-wide counters recomputed after the device cycle drains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub total_devices: i64,
    pub online_devices: i64,
    pub total_profit: f64,
    pub profit_today: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait StatsStore: Send + Sync + std::fmt::Debug {
    /// Insert or update device status rows.
    async fn upsert_devices(&self, area_id: &AreaId, devices: &[NodeInfo]) -> Result<u64>;

    async fn insert_hourly_snapshots(&self, rows: &[DeviceSnapshot]) -> Result<u64>;

    /// Recompute today's running totals for the given devices from their
    /// hourly snapshots.
    async fn refresh_daily_totals(&self, device_ids: &[String], day: NaiveDate) -> Result<u64>;

    async fn refresh_online_counts(&self) -> Result<NetworkSummary>;

    async fn refresh_reward_summary(&self, day: NaiveDate) -> Result<NetworkSummary>;

    async fn refresh_daily_ranks(&self, day: NaiveDate) -> Result<u64>;

    /// The asset with the newest end time in `area_id`.
    async fn latest_asset(&self, area_id: &AreaId) -> Result<Option<AssetRecord>>;

    async fn upsert_assets(&self, area_id: &AreaId, assets: &[AssetRecord]) -> Result<u64>;

    /// Creation time of the newest stored event of `kind` for `area_id`.
    async fn latest_event_time(
        &self,
        kind: EventKind,
        area_id: &AreaId,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Insert raw events and move the stream's high-water mark forward.
    async fn insert_events(&self, area_id: &AreaId, rows: &EventRows) -> Result<u64>;

    /// Fold raw events up to `until` into hourly summaries, then delete the
    /// raw rows that were folded.
    async fn compact_events(
        &self,
        kind: EventKind,
        area_id: &AreaId,
        until: DateTime<Utc>,
    ) -> Result<CompactionStats>;

    async fn upsert_system_info(
        &self,
        scheduler_id: &SchedulerId,
        area_id: &AreaId,
        info: &SystemInfo,
    ) -> Result<()>;

    /// Mark devices that stayed online long enough during `hour`.
    async fn refresh_incentive_eligibility(
        &self,
        hour: DateTime<Utc>,
        min_online_minutes: i64,
    ) -> Result<u64>;
}

/// Rows with duplicate keys collapsed to the last occurrence, in first-seen
/// key order. Bulk upserts cannot touch the same row twice in one statement.
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub(crate) fn last_per_key<'a, T, K, F>(rows: &'a [T], key: F) -> Vec<&'a T>
where
    K: Eq + Hash,
    F: Fn(&'a T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut kept: Vec<&'a T> = Vec::with_capacity(rows.len());
    for row in rows {
        match index.entry(key(row)) {
            Entry::Occupied(slot) => kept[*slot.get()] = row,
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(row);
            }
        }
    }
    kept
}

/// Start of the hour containing `at`.
pub fn hour_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(at)
}
