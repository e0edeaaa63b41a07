use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use stratus_model::{AreaId, AssetRecord, EventKind, NodeInfo, SchedulerId, SystemInfo};

use super::{
    CompactionStats, DeviceSnapshot, EventRows, NetworkSummary, StatsStore, hour_bucket,
};
use crate::error::Result;

/// Running totals for one device on one day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyTotals {
    pub area_id: Option<AreaId>,
    pub profit: f64,
    pub online_minutes: i64,
    pub upload_traffic: i64,
    pub download_traffic: i64,
    pub rank: Option<i64>,
}

/// Hourly rollup of one event stream for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventSummary {
    pub count: i64,
    pub succeeded: i64,
    pub bytes: i64,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    key: String,
    node_id: String,
    created_time: DateTime<Utc>,
    succeeded: bool,
    bytes: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    devices: HashMap<String, (AreaId, NodeInfo)>,
    hourly: BTreeMap<(String, DateTime<Utc>), DeviceSnapshot>,
    daily: HashMap<(String, NaiveDate), DailyTotals>,
    summary: NetworkSummary,
    assets: HashMap<(AreaId, String), AssetRecord>,
    events: HashMap<(EventKind, AreaId), Vec<StoredEvent>>,
    watermarks: HashMap<(EventKind, AreaId), DateTime<Utc>>,
    summaries: HashMap<(EventKind, AreaId, String, DateTime<Utc>), EventSummary>,
    system_info: HashMap<SchedulerId, (AreaId, SystemInfo)>,
    eligibility: HashMap<(String, DateTime<Utc>), bool>,
}

/// Process-local [`StatsStore`] used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStatsStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self, device_id: &str) -> Option<(AreaId, NodeInfo)> {
        self.state.lock().devices.get(device_id).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    pub fn hourly_snapshots(&self, device_id: &str) -> Vec<DeviceSnapshot> {
        self.state
            .lock()
            .hourly
            .iter()
            .filter(|((id, _), _)| id == device_id)
            .map(|(_, row)| row.clone())
            .collect()
    }

    pub fn daily_totals(&self, device_id: &str, day: NaiveDate) -> Option<DailyTotals> {
        self.state
            .lock()
            .daily
            .get(&(device_id.to_string(), day))
            .cloned()
    }

    pub fn network_summary(&self) -> NetworkSummary {
        self.state.lock().summary.clone()
    }

    pub fn assets(&self, area_id: &AreaId) -> Vec<AssetRecord> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .assets
            .iter()
            .filter(|((area, _), _)| area == area_id)
            .map(|(_, asset)| asset.clone())
            .collect();
        rows.sort_by_key(|a| a.end_time);
        rows
    }

    pub fn raw_event_count(&self, kind: EventKind, area_id: &AreaId) -> usize {
        self.state
            .lock()
            .events
            .get(&(kind, area_id.clone()))
            .map_or(0, Vec::len)
    }

    pub fn event_summaries(
        &self,
        kind: EventKind,
        area_id: &AreaId,
    ) -> Vec<(String, DateTime<Utc>, EventSummary)> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .summaries
            .iter()
            .filter(|((k, area, _, _), _)| *k == kind && area == area_id)
            .map(|((_, _, node, bucket), summary)| (node.clone(), *bucket, *summary))
            .collect();
        rows.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        rows
    }

    pub fn system_info(&self, scheduler_id: &SchedulerId) -> Option<(AreaId, SystemInfo)> {
        self.state.lock().system_info.get(scheduler_id).cloned()
    }

    pub fn eligible_devices(&self, hour: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<_> = self
            .state
            .lock()
            .eligibility
            .iter()
            .filter(|((_, h), eligible)| *h == hour && **eligible)
            .map(|((id, _), _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

fn flatten(rows: &EventRows) -> Vec<StoredEvent> {
    match rows {
        EventRows::Replica(events) => events
            .iter()
            .map(|e| StoredEvent {
                key: format!("{}:{}:{}", e.node_id, e.hash, e.created_time.timestamp_micros()),
                node_id: e.node_id.clone(),
                created_time: e.created_time,
                succeeded: e.status.is_success(),
                bytes: e.done_size,
            })
            .collect(),
        EventRows::Validation(events) => events
            .iter()
            .map(|e| StoredEvent {
                key: e.id.to_string(),
                node_id: e.node_id.clone(),
                created_time: e.created_time,
                succeeded: e.status.is_success(),
                bytes: 0,
            })
            .collect(),
        EventRows::Retrieval(events) => events
            .iter()
            .map(|e| StoredEvent {
                key: e.token_id.clone(),
                node_id: e.node_id.clone(),
                created_time: e.created_time,
                succeeded: e.succeeded,
                bytes: e.size,
            })
            .collect(),
    }
}

#[async_trait]
impl StatsStore for InMemoryStatsStore {
    async fn upsert_devices(&self, area_id: &AreaId, devices: &[NodeInfo]) -> Result<u64> {
        let mut state = self.state.lock();
        for node in devices {
            state
                .devices
                .insert(node.node_id.clone(), (area_id.clone(), node.clone()));
        }
        Ok(devices.len() as u64)
    }

    async fn insert_hourly_snapshots(&self, rows: &[DeviceSnapshot]) -> Result<u64> {
        let mut state = self.state.lock();
        for row in rows {
            state
                .hourly
                .insert((row.device_id.clone(), row.hour), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn refresh_daily_totals(&self, device_ids: &[String], day: NaiveDate) -> Result<u64> {
        let mut state = self.state.lock();
        let mut updated = 0;
        for device_id in device_ids {
            let today: Vec<DeviceSnapshot> = state
                .hourly
                .iter()
                .filter(|((id, hour), _)| id == device_id && hour.date_naive() == day)
                .map(|(_, row)| row.clone())
                .collect();
            let (Some(first), Some(last)) = (today.first(), today.last()) else {
                continue;
            };
            let totals = state
                .daily
                .entry((device_id.clone(), day))
                .or_default();
            totals.area_id = Some(last.area_id.clone());
            totals.profit = last.profit - first.profit;
            totals.online_minutes = last.online_duration - first.online_duration;
            totals.upload_traffic = last.upload_traffic - first.upload_traffic;
            totals.download_traffic = last.download_traffic - first.download_traffic;
            updated += 1;
        }
        Ok(updated)
    }

    async fn refresh_online_counts(&self) -> Result<NetworkSummary> {
        let mut state = self.state.lock();
        let online = state
            .devices
            .values()
            .filter(|(_, node)| node.is_online())
            .count() as i64;
        state.summary.total_devices = state.devices.len() as i64;
        state.summary.online_devices = online;
        state.summary.updated_at = Some(Utc::now());
        Ok(state.summary.clone())
    }

    async fn refresh_reward_summary(&self, day: NaiveDate) -> Result<NetworkSummary> {
        let mut state = self.state.lock();
        state.summary.total_profit = state.devices.values().map(|(_, node)| node.profit).sum();
        state.summary.profit_today = state
            .daily
            .iter()
            .filter(|((_, d), _)| *d == day)
            .map(|(_, totals)| totals.profit)
            .sum();
        state.summary.updated_at = Some(Utc::now());
        Ok(state.summary.clone())
    }

    async fn refresh_daily_ranks(&self, day: NaiveDate) -> Result<u64> {
        let mut state = self.state.lock();
        let mut ranked: Vec<(String, f64)> = state
            .daily
            .iter()
            .filter(|((_, d), _)| *d == day)
            .map(|((id, _), totals)| (id.clone(), totals.profit))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (position, (device_id, _)) in ranked.iter().enumerate() {
            if let Some(totals) = state.daily.get_mut(&(device_id.clone(), day)) {
                totals.rank = Some(position as i64 + 1);
            }
        }
        Ok(ranked.len() as u64)
    }

    async fn latest_asset(&self, area_id: &AreaId) -> Result<Option<AssetRecord>> {
        Ok(self
            .state
            .lock()
            .assets
            .iter()
            .filter(|((area, _), _)| area == area_id)
            .map(|(_, asset)| asset)
            .max_by_key(|asset| asset.end_time)
            .cloned())
    }

    async fn upsert_assets(&self, area_id: &AreaId, assets: &[AssetRecord]) -> Result<u64> {
        let mut state = self.state.lock();
        for asset in assets {
            state
                .assets
                .insert((area_id.clone(), asset.hash.clone()), asset.clone());
        }
        Ok(assets.len() as u64)
    }

    async fn latest_event_time(
        &self,
        kind: EventKind,
        area_id: &AreaId,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .state
            .lock()
            .watermarks
            .get(&(kind, area_id.clone()))
            .copied())
    }

    async fn insert_events(&self, area_id: &AreaId, rows: &EventRows) -> Result<u64> {
        let kind = rows.kind();
        let mut state = self.state.lock();
        let stream = state.events.entry((kind, area_id.clone())).or_default();
        let mut inserted = 0;
        for event in flatten(rows) {
            if stream.iter().any(|existing| existing.key == event.key) {
                continue;
            }
            stream.push(event);
            inserted += 1;
        }
        if let Some(newest) = rows.newest() {
            let mark = state
                .watermarks
                .entry((kind, area_id.clone()))
                .or_insert(newest);
            *mark = (*mark).max(newest);
        }
        Ok(inserted)
    }

    async fn compact_events(
        &self,
        kind: EventKind,
        area_id: &AreaId,
        until: DateTime<Utc>,
    ) -> Result<CompactionStats> {
        let mut state = self.state.lock();
        let raw = state.events.remove(&(kind, area_id.clone())).unwrap_or_default();
        let (folded, kept): (Vec<_>, Vec<_>) =
            raw.into_iter().partition(|e| e.created_time <= until);

        let mut touched = HashMap::new();
        for event in &folded {
            let bucket = hour_bucket(event.created_time);
            let key = (kind, area_id.clone(), event.node_id.clone(), bucket);
            let summary = state.summaries.entry(key.clone()).or_default();
            summary.count += 1;
            summary.succeeded += i64::from(event.succeeded);
            summary.bytes += event.bytes;
            touched.insert(key, ());
        }
        if !kept.is_empty() {
            state.events.insert((kind, area_id.clone()), kept);
        }
        Ok(CompactionStats {
            buckets: touched.len() as u64,
            deleted: folded.len() as u64,
        })
    }

    async fn upsert_system_info(
        &self,
        scheduler_id: &SchedulerId,
        area_id: &AreaId,
        info: &SystemInfo,
    ) -> Result<()> {
        self.state
            .lock()
            .system_info
            .insert(scheduler_id.clone(), (area_id.clone(), info.clone()));
        Ok(())
    }

    async fn refresh_incentive_eligibility(
        &self,
        hour: DateTime<Utc>,
        min_online_minutes: i64,
    ) -> Result<u64> {
        let hour = hour_bucket(hour);
        let previous = hour - Duration::hours(1);
        let mut state = self.state.lock();
        let decisions: Vec<(String, bool)> = state
            .hourly
            .iter()
            .filter(|((_, h), _)| *h == hour)
            .map(|((id, _), row)| {
                let before = state
                    .hourly
                    .get(&(id.clone(), previous))
                    .map_or(row.online_duration, |prev| prev.online_duration);
                (id.clone(), row.online_duration - before >= min_online_minutes)
            })
            .collect();
        let eligible = decisions.iter().filter(|(_, ok)| *ok).count() as u64;
        for (device_id, ok) in decisions {
            state.eligibility.insert((device_id, hour), ok);
        }
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stratus_model::{NodeStatus, ReplicaEvent, ReplicaStatus};

    fn node(id: &str, status: NodeStatus, profit: f64, online: i64) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            status,
            external_ip: String::new(),
            cpu_cores: 4,
            memory: 0.0,
            disk_space: 0.0,
            disk_usage: 0.0,
            bandwidth_up: 0,
            bandwidth_down: 0,
            online_duration: online,
            profit,
            download_traffic: 0,
            upload_traffic: 0,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn daily_totals_and_ranks_follow_hourly_snapshots() {
        let store = InMemoryStatsStore::new();
        let area = AreaId::from("area-1");
        let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        let rows = vec![
            DeviceSnapshot::from_node(&area, &node("a", NodeStatus::Online, 10.0, 100), day + Duration::hours(1)),
            DeviceSnapshot::from_node(&area, &node("a", NodeStatus::Online, 14.0, 160), day + Duration::hours(2)),
            DeviceSnapshot::from_node(&area, &node("b", NodeStatus::Online, 3.0, 10), day + Duration::hours(1)),
            DeviceSnapshot::from_node(&area, &node("b", NodeStatus::Online, 9.0, 70), day + Duration::hours(2)),
        ];
        store.insert_hourly_snapshots(&rows).await.unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(store.refresh_daily_totals(&ids, day.date_naive()).await.unwrap(), 2);
        assert_eq!(store.refresh_daily_ranks(day.date_naive()).await.unwrap(), 2);

        let a = store.daily_totals("a", day.date_naive()).unwrap();
        let b = store.daily_totals("b", day.date_naive()).unwrap();
        assert_eq!(a.profit, 4.0);
        assert_eq!(a.online_minutes, 60);
        assert_eq!(b.rank, Some(1));
        assert_eq!(a.rank, Some(2));
    }

    #[tokio::test]
    async fn compaction_folds_and_deletes_only_up_to_until() {
        let store = InMemoryStatsStore::new();
        let area = AreaId::from("area-1");
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let event = |n: i64, status| ReplicaEvent {
            node_id: "n1".into(),
            cid: String::new(),
            hash: format!("h{n}"),
            status,
            done_size: 100,
            start_time: base,
            end_time: base,
            created_time: base + Duration::minutes(n * 20),
        };
        let rows = EventRows::Replica(vec![
            event(0, ReplicaStatus::Succeeded),
            event(1, ReplicaStatus::Failed),
            event(4, ReplicaStatus::Succeeded),
        ]);
        assert_eq!(store.insert_events(&area, &rows).await.unwrap(), 3);
        assert_eq!(store.insert_events(&area, &rows).await.unwrap(), 0);

        let stats = store
            .compact_events(EventKind::Replica, &area, base + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(stats, CompactionStats { buckets: 1, deleted: 2 });
        assert_eq!(store.raw_event_count(EventKind::Replica, &area), 1);

        let summaries = store.event_summaries(EventKind::Replica, &area);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].2, EventSummary { count: 2, succeeded: 1, bytes: 200 });
        assert_eq!(
            store.latest_event_time(EventKind::Replica, &area).await.unwrap(),
            Some(base + Duration::minutes(80))
        );
    }

    #[tokio::test]
    async fn incentive_eligibility_uses_previous_hour_delta() {
        let store = InMemoryStatsStore::new();
        let area = AreaId::from("area-1");
        let hour = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        store
            .insert_hourly_snapshots(&[
                DeviceSnapshot::from_node(&area, &node("steady", NodeStatus::Online, 0.0, 100), hour - Duration::hours(1)),
                DeviceSnapshot::from_node(&area, &node("steady", NodeStatus::Online, 0.0, 158), hour),
                DeviceSnapshot::from_node(&area, &node("flaky", NodeStatus::Online, 0.0, 100), hour - Duration::hours(1)),
                DeviceSnapshot::from_node(&area, &node("flaky", NodeStatus::Online, 0.0, 120), hour),
            ])
            .await
            .unwrap();
        assert_eq!(store.refresh_incentive_eligibility(hour, 50).await.unwrap(), 1);
        assert_eq!(store.eligible_devices(hour), vec!["steady".to_string()]);
    }
}
