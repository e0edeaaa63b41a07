use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgPoolOptions};
use stratus_model::{AreaId, AssetRecord, EventKind, NodeInfo, SchedulerId, SystemInfo};
use tracing::{debug, info};

use super::{
    CompactionStats, DeviceSnapshot, EventRows, NetworkSummary, StatsStore, last_per_key,
};
use crate::error::Result;

type SummaryRow = (i64, i64, f64, f64, Option<DateTime<Utc>>);

/// Bind parameters Postgres accepts in one statement.
const MAX_BIND_PARAMS: usize = 65_535;

const DEVICE_COLUMNS: usize = 15;
const SNAPSHOT_COLUMNS: usize = 8;
const ASSET_COLUMNS: usize = 9;

/// Rows of `columns` binds each that fit in one statement.
fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

#[derive(Debug, sqlx::FromRow)]
struct AssetRow {
    cid: String,
    hash: String,
    total_size: i64,
    state: String,
    replicas: i64,
    total_blocks: i64,
    created_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl From<AssetRow> for AssetRecord {
    fn from(row: AssetRow) -> Self {
        AssetRecord {
            cid: row.cid,
            hash: row.hash,
            total_size: row.total_size,
            state: row.state,
            replicas: row.replicas,
            total_blocks: row.total_blocks,
            created_time: row.created_time,
            end_time: row.end_time,
        }
    }
}

/// Raw table layout of one event stream, used by compaction.
struct EventTable {
    table: &'static str,
    success: &'static str,
    bytes: &'static str,
}

fn event_table(kind: EventKind) -> EventTable {
    match kind {
        EventKind::Replica => EventTable {
            table: "replica_events",
            success: "status = 'succeeded'",
            bytes: "done_size",
        },
        EventKind::Validation => EventTable {
            table: "validation_events",
            success: "status = 'success'",
            bytes: "0",
        },
        EventKind::Retrieval => EventTable {
            table: "retrieval_events",
            success: "succeeded",
            bytes: "size",
        },
    }
}

fn summary_from_row(row: SummaryRow) -> NetworkSummary {
    NetworkSummary {
        total_devices: row.0,
        online_devices: row.1,
        total_profit: row.2,
        profit_today: row.3,
        updated_at: row.4,
    }
}

fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}

/// [`StatsStore`] backed by PostgreSQL.
#[derive(Clone, Debug)]
pub struct PostgresStatsStore {
    pool: PgPool,
}

impl PostgresStatsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to statistics database");
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_summary(&self, sql: &str, day: Option<NaiveDate>) -> Result<NetworkSummary> {
        let mut query = sqlx::query_as::<_, SummaryRow>(sql);
        if let Some(day) = day {
            query = query.bind(day);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(summary_from_row(row))
    }
}

#[async_trait]
impl StatsStore for PostgresStatsStore {
    async fn upsert_devices(&self, area_id: &AreaId, devices: &[NodeInfo]) -> Result<u64> {
        if devices.is_empty() {
            return Ok(0);
        }

        let devices = last_per_key(devices, |node| node.node_id.as_str());
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for chunk in devices.chunks(rows_per_statement(DEVICE_COLUMNS)) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO device_info (device_id, area_id, status, external_ip, cpu_cores, \
                 memory, disk_space, disk_usage, bandwidth_up, bandwidth_down, online_duration, \
                 profit, download_traffic, upload_traffic, last_seen) ",
            );
            builder.push_values(chunk, |mut row, node| {
                row.push_bind(node.node_id.as_str())
                    .push_bind(area_id.as_str())
                    .push_bind(node.status.as_str())
                    .push_bind(node.external_ip.as_str())
                    .push_bind(node.cpu_cores)
                    .push_bind(node.memory)
                    .push_bind(node.disk_space)
                    .push_bind(node.disk_usage)
                    .push_bind(node.bandwidth_up)
                    .push_bind(node.bandwidth_down)
                    .push_bind(node.online_duration)
                    .push_bind(node.profit)
                    .push_bind(node.download_traffic)
                    .push_bind(node.upload_traffic)
                    .push_bind(node.last_seen);
            });
            builder.push(
                " ON CONFLICT (device_id) DO UPDATE SET \
                 area_id = EXCLUDED.area_id, status = EXCLUDED.status, \
                 external_ip = EXCLUDED.external_ip, cpu_cores = EXCLUDED.cpu_cores, \
                 memory = EXCLUDED.memory, disk_space = EXCLUDED.disk_space, \
                 disk_usage = EXCLUDED.disk_usage, bandwidth_up = EXCLUDED.bandwidth_up, \
                 bandwidth_down = EXCLUDED.bandwidth_down, \
                 online_duration = EXCLUDED.online_duration, profit = EXCLUDED.profit, \
                 download_traffic = EXCLUDED.download_traffic, \
                 upload_traffic = EXCLUDED.upload_traffic, last_seen = EXCLUDED.last_seen, \
                 updated_at = NOW()",
            );
            affected += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn insert_hourly_snapshots(&self, rows: &[DeviceSnapshot]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let rows = last_per_key(rows, |row| (row.device_id.as_str(), row.hour));
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for chunk in rows.chunks(rows_per_statement(SNAPSHOT_COLUMNS)) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO device_info_hour (device_id, area_id, hour, online_duration, profit, \
                 disk_usage, upload_traffic, download_traffic) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.device_id.as_str())
                    .push_bind(row.area_id.as_str())
                    .push_bind(row.hour)
                    .push_bind(row.online_duration)
                    .push_bind(row.profit)
                    .push_bind(row.disk_usage)
                    .push_bind(row.upload_traffic)
                    .push_bind(row.download_traffic);
            });
            builder.push(
                " ON CONFLICT (device_id, hour) DO UPDATE SET \
                 area_id = EXCLUDED.area_id, online_duration = EXCLUDED.online_duration, \
                 profit = EXCLUDED.profit, disk_usage = EXCLUDED.disk_usage, \
                 upload_traffic = EXCLUDED.upload_traffic, \
                 download_traffic = EXCLUDED.download_traffic",
            );
            affected += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn refresh_daily_totals(&self, device_ids: &[String], day: NaiveDate) -> Result<u64> {
        if device_ids.is_empty() {
            return Ok(0);
        }
        let (start, end) = day_bounds(day);

        let result = sqlx::query(
            r#"
            INSERT INTO device_info_daily
                (device_id, day, area_id, profit, online_minutes, upload_traffic, download_traffic, updated_at)
            SELECT
                device_id,
                $2,
                (array_agg(area_id ORDER BY hour DESC))[1],
                MAX(profit) - MIN(profit),
                MAX(online_duration) - MIN(online_duration),
                MAX(upload_traffic) - MIN(upload_traffic),
                MAX(download_traffic) - MIN(download_traffic),
                NOW()
            FROM device_info_hour
            WHERE device_id = ANY($1) AND hour >= $3 AND hour < $4
            GROUP BY device_id
            ON CONFLICT (device_id, day) DO UPDATE SET
                area_id = EXCLUDED.area_id,
                profit = EXCLUDED.profit,
                online_minutes = EXCLUDED.online_minutes,
                upload_traffic = EXCLUDED.upload_traffic,
                download_traffic = EXCLUDED.download_traffic,
                updated_at = NOW()
            "#,
        )
        .bind(device_ids)
        .bind(day)
        .bind(start)
        .bind(end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn refresh_online_counts(&self) -> Result<NetworkSummary> {
        self.upsert_summary(
            r#"
            INSERT INTO network_summary (id, total_devices, online_devices, updated_at)
            SELECT 1, COUNT(*), COUNT(*) FILTER (WHERE status = 'online'), NOW()
            FROM device_info
            ON CONFLICT (id) DO UPDATE SET
                total_devices = EXCLUDED.total_devices,
                online_devices = EXCLUDED.online_devices,
                updated_at = EXCLUDED.updated_at
            RETURNING total_devices, online_devices, total_profit, profit_today, updated_at
            "#,
            None,
        )
        .await
    }

    async fn refresh_reward_summary(&self, day: NaiveDate) -> Result<NetworkSummary> {
        self.upsert_summary(
            r#"
            INSERT INTO network_summary (id, total_profit, profit_today, updated_at)
            SELECT
                1,
                COALESCE((SELECT SUM(profit) FROM device_info), 0),
                COALESCE((SELECT SUM(profit) FROM device_info_daily WHERE day = $1), 0),
                NOW()
            ON CONFLICT (id) DO UPDATE SET
                total_profit = EXCLUDED.total_profit,
                profit_today = EXCLUDED.profit_today,
                updated_at = EXCLUDED.updated_at
            RETURNING total_devices, online_devices, total_profit, profit_today, updated_at
            "#,
            Some(day),
        )
        .await
    }

    async fn refresh_daily_ranks(&self, day: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE device_info_daily AS d
            SET rank = ranked.position
            FROM (
                SELECT device_id,
                       ROW_NUMBER() OVER (ORDER BY profit DESC, device_id) AS position
                FROM device_info_daily
                WHERE day = $1
            ) AS ranked
            WHERE d.device_id = ranked.device_id AND d.day = $1
            "#,
        )
        .bind(day)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn latest_asset(&self, area_id: &AreaId) -> Result<Option<AssetRecord>> {
        let row = sqlx::query_as::<_, AssetRow>(
            r#"
            SELECT cid, hash, total_size, state, replicas, total_blocks, created_time, end_time
            FROM assets
            WHERE area_id = $1
            ORDER BY end_time DESC
            LIMIT 1
            "#,
        )
        .bind(area_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AssetRecord::from))
    }

    async fn upsert_assets(&self, area_id: &AreaId, assets: &[AssetRecord]) -> Result<u64> {
        if assets.is_empty() {
            return Ok(0);
        }

        let assets = last_per_key(assets, |asset| asset.hash.as_str());
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for chunk in assets.chunks(rows_per_statement(ASSET_COLUMNS)) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO assets (area_id, hash, cid, total_size, state, replicas, total_blocks, \
                 created_time, end_time) ",
            );
            builder.push_values(chunk, |mut b, asset| {
                b.push_bind(area_id.as_str())
                    .push_bind(asset.hash.as_str())
                    .push_bind(asset.cid.as_str())
                    .push_bind(asset.total_size)
                    .push_bind(asset.state.as_str())
                    .push_bind(asset.replicas)
                    .push_bind(asset.total_blocks)
                    .push_bind(asset.created_time)
                    .push_bind(asset.end_time);
            });
            builder.push(
                " ON CONFLICT (area_id, hash) DO UPDATE SET \
                 cid = EXCLUDED.cid, total_size = EXCLUDED.total_size, state = EXCLUDED.state, \
                 replicas = EXCLUDED.replicas, total_blocks = EXCLUDED.total_blocks, \
                 created_time = EXCLUDED.created_time, end_time = EXCLUDED.end_time",
            );
            affected += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn latest_event_time(
        &self,
        kind: EventKind,
        area_id: &AreaId,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT latest FROM fetch_watermarks WHERE kind = $1 AND area_id = $2",
        )
        .bind(kind.as_str())
        .bind(area_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest)
    }

    async fn insert_events(&self, area_id: &AreaId, rows: &EventRows) -> Result<u64> {
        let Some(newest) = rows.newest() else {
            return Ok(0);
        };

        let mut builder = match rows {
            EventRows::Replica(events) => {
                let mut b = QueryBuilder::<Postgres>::new(
                    "INSERT INTO replica_events (area_id, node_id, hash, cid, status, done_size, \
                     start_time, end_time, created_time) ",
                );
                b.push_values(events, |mut row, e| {
                    row.push_bind(area_id.as_str())
                        .push_bind(e.node_id.as_str())
                        .push_bind(e.hash.as_str())
                        .push_bind(e.cid.as_str())
                        .push_bind(e.status.as_str())
                        .push_bind(e.done_size)
                        .push_bind(e.start_time)
                        .push_bind(e.end_time)
                        .push_bind(e.created_time);
                });
                b
            }
            EventRows::Validation(events) => {
                let mut b = QueryBuilder::<Postgres>::new(
                    "INSERT INTO validation_events (area_id, id, node_id, validator_id, cid, \
                     status, bandwidth, duration, created_time) ",
                );
                b.push_values(events, |mut row, e| {
                    row.push_bind(area_id.as_str())
                        .push_bind(e.id)
                        .push_bind(e.node_id.as_str())
                        .push_bind(e.validator_id.as_str())
                        .push_bind(e.cid.as_str())
                        .push_bind(e.status.as_str())
                        .push_bind(e.bandwidth)
                        .push_bind(e.duration)
                        .push_bind(e.created_time);
                });
                b
            }
            EventRows::Retrieval(events) => {
                let mut b = QueryBuilder::<Postgres>::new(
                    "INSERT INTO retrieval_events (area_id, token_id, node_id, client_id, cid, \
                     size, succeeded, created_time) ",
                );
                b.push_values(events, |mut row, e| {
                    row.push_bind(area_id.as_str())
                        .push_bind(e.token_id.as_str())
                        .push_bind(e.node_id.as_str())
                        .push_bind(e.client_id.as_str())
                        .push_bind(e.cid.as_str())
                        .push_bind(e.size)
                        .push_bind(e.succeeded)
                        .push_bind(e.created_time);
                });
                b
            }
        };
        builder.push(" ON CONFLICT DO NOTHING");

        let mut tx = self.pool.begin().await?;
        let inserted = builder.build().execute(&mut *tx).await?.rows_affected();
        sqlx::query(
            r#"
            INSERT INTO fetch_watermarks (kind, area_id, latest)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind, area_id) DO UPDATE SET
                latest = GREATEST(fetch_watermarks.latest, EXCLUDED.latest),
                updated_at = NOW()
            "#,
        )
        .bind(rows.kind().as_str())
        .bind(area_id.as_str())
        .bind(newest)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(kind = %rows.kind(), area = %area_id, inserted, "events stored");
        Ok(inserted)
    }

    async fn compact_events(
        &self,
        kind: EventKind,
        area_id: &AreaId,
        until: DateTime<Utc>,
    ) -> Result<CompactionStats> {
        let layout = event_table(kind);
        let fold = format!(
            r#"
            INSERT INTO event_summaries (kind, area_id, node_id, hour, count, succeeded, bytes)
            SELECT
                $1,
                area_id,
                node_id,
                date_trunc('hour', created_time AT TIME ZONE 'UTC') AT TIME ZONE 'UTC',
                COUNT(*),
                COUNT(*) FILTER (WHERE {success}),
                COALESCE(SUM({bytes}), 0)::BIGINT
            FROM {table}
            WHERE area_id = $2 AND created_time <= $3
            GROUP BY 2, 3, 4
            ON CONFLICT (kind, area_id, node_id, hour) DO UPDATE SET
                count = event_summaries.count + EXCLUDED.count,
                succeeded = event_summaries.succeeded + EXCLUDED.succeeded,
                bytes = event_summaries.bytes + EXCLUDED.bytes
            "#,
            success = layout.success,
            bytes = layout.bytes,
            table = layout.table,
        );
        let purge = format!(
            "DELETE FROM {table} WHERE area_id = $1 AND created_time <= $2",
            table = layout.table
        );

        let mut tx = self.pool.begin().await?;
        let buckets = sqlx::query(&fold)
            .bind(kind.as_str())
            .bind(area_id.as_str())
            .bind(until)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let deleted = sqlx::query(&purge)
            .bind(area_id.as_str())
            .bind(until)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(CompactionStats { buckets, deleted })
    }

    async fn upsert_system_info(
        &self,
        scheduler_id: &SchedulerId,
        area_id: &AreaId,
        info: &SystemInfo,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_info (
                scheduler_id, area_id, candidate_count, edge_count, online_count, asset_count,
                storage_used, storage_total, upload_bandwidth, download_bandwidth, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (scheduler_id) DO UPDATE SET
                area_id = EXCLUDED.area_id,
                candidate_count = EXCLUDED.candidate_count,
                edge_count = EXCLUDED.edge_count,
                online_count = EXCLUDED.online_count,
                asset_count = EXCLUDED.asset_count,
                storage_used = EXCLUDED.storage_used,
                storage_total = EXCLUDED.storage_total,
                upload_bandwidth = EXCLUDED.upload_bandwidth,
                download_bandwidth = EXCLUDED.download_bandwidth,
                updated_at = NOW()
            "#,
        )
        .bind(scheduler_id.as_str())
        .bind(area_id.as_str())
        .bind(info.candidate_count)
        .bind(info.edge_count)
        .bind(info.online_count)
        .bind(info.asset_count)
        .bind(info.storage_used)
        .bind(info.storage_total)
        .bind(info.upload_bandwidth)
        .bind(info.download_bandwidth)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn refresh_incentive_eligibility(
        &self,
        hour: DateTime<Utc>,
        min_online_minutes: i64,
    ) -> Result<u64> {
        let hour = super::hour_bucket(hour);
        let decisions = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO incentive_eligibility (device_id, hour, online_minutes, eligible)
            SELECT
                cur.device_id,
                cur.hour,
                cur.online_duration - COALESCE(prev.online_duration, cur.online_duration),
                cur.online_duration - COALESCE(prev.online_duration, cur.online_duration) >= $2
            FROM device_info_hour AS cur
            LEFT JOIN device_info_hour AS prev
                ON prev.device_id = cur.device_id AND prev.hour = cur.hour - INTERVAL '1 hour'
            WHERE cur.hour = $1
            ON CONFLICT (device_id, hour) DO UPDATE SET
                online_minutes = EXCLUDED.online_minutes,
                eligible = EXCLUDED.eligible
            RETURNING eligible
            "#,
        )
        .bind(hour)
        .bind(min_online_minutes)
        .fetch_all(&self.pool)
        .await?;

        let eligible = decisions.iter().filter(|ok| **ok).count() as u64;
        debug!(%hour, devices = decisions.len(), eligible, "incentive eligibility refreshed");
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stratus_model::NodeStatus;

    fn node(id: &str, status: NodeStatus, profit: f64) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            status,
            external_ip: "10.0.0.1".into(),
            cpu_cores: 8,
            memory: 0.0,
            disk_space: 0.0,
            disk_usage: 12.5,
            bandwidth_up: 0,
            bandwidth_down: 0,
            online_duration: 600,
            profit,
            download_traffic: 0,
            upload_traffic: 0,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn day_bounds_cover_one_utc_day() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let (start, end) = day_bounds(day);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(end - start, chrono::Duration::days(1));
    }

    #[test]
    fn wide_batches_split_under_the_bind_limit() {
        let rows = rows_per_statement(DEVICE_COLUMNS);
        assert_eq!(rows, 4369);
        assert!(rows * DEVICE_COLUMNS <= MAX_BIND_PARAMS);
        assert!((rows + 1) * DEVICE_COLUMNS > MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMS);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    #[ignore = "requires DATABASE_URL"]
    async fn oversized_page_with_duplicates_upserts(pool: PgPool) {
        let store = PostgresStatsStore::new(pool);
        let area = AreaId::from("area-1");
        let mut devices: Vec<_> = (0..5000)
            .map(|i| node(&format!("d-{i}"), NodeStatus::Online, 1.0))
            .collect();
        devices.push(node("d-0", NodeStatus::Offline, 9.0));

        assert_eq!(store.upsert_devices(&area, &devices).await.unwrap(), 5000);
        let summary = store.refresh_online_counts().await.unwrap();
        assert_eq!(summary.total_devices, 5000);
        assert_eq!(summary.online_devices, 4999);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    #[ignore = "requires DATABASE_URL"]
    async fn device_upsert_is_idempotent(pool: PgPool) {
        let store = PostgresStatsStore::new(pool);
        let area = AreaId::from("area-1");
        let devices = vec![
            node("a", NodeStatus::Online, 1.0),
            node("b", NodeStatus::Offline, 2.0),
        ];

        store.upsert_devices(&area, &devices).await.unwrap();
        store.upsert_devices(&area, &devices).await.unwrap();

        let summary = store.refresh_online_counts().await.unwrap();
        assert_eq!(summary.total_devices, 2);
        assert_eq!(summary.online_devices, 1);
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    #[ignore = "requires DATABASE_URL"]
    async fn watermark_survives_compaction(pool: PgPool) {
        use stratus_model::RetrievalEvent;

        let store = PostgresStatsStore::new(pool);
        let area = AreaId::from("area-1");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();
        let rows = EventRows::Retrieval(vec![RetrievalEvent {
            token_id: "t-1".into(),
            node_id: "n-1".into(),
            client_id: String::new(),
            cid: String::new(),
            size: 42,
            succeeded: true,
            created_time: at,
        }]);

        assert_eq!(store.insert_events(&area, &rows).await.unwrap(), 1);
        assert_eq!(store.insert_events(&area, &rows).await.unwrap(), 0);

        let stats = store
            .compact_events(EventKind::Retrieval, &area, at)
            .await
            .unwrap();
        assert_eq!(stats.deleted, 1);
        assert_eq!(
            store.latest_event_time(EventKind::Retrieval, &area).await.unwrap(),
            Some(at)
        );
    }
}
