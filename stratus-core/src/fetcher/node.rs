use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stratus_model::NodeInfo;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{BaseFetcher, Fetcher, FetcherContext, PageCursor, remote};
use crate::{
    directory::Scheduler,
    error::Result,
    queue::{Job, JobQueue},
    store::{DeviceSnapshot, StatsStore},
};

/// Device status, hourly snapshots and same-day totals.
#[derive(Debug)]
pub struct NodeFetcher {
    base: BaseFetcher,
    store: Arc<dyn StatsStore>,
    page_size: i64,
}

impl NodeFetcher {
    pub const NAME: &'static str = "node";

    pub fn new(ctx: &FetcherContext) -> Self {
        Self {
            base: BaseFetcher::new(Self::NAME, ctx.queue_capacity()),
            store: Arc::clone(&ctx.store),
            page_size: ctx.page_size(),
        }
    }

    async fn push_page(
        &self,
        cancel: &CancellationToken,
        scheduler: &Scheduler,
        nodes: Vec<NodeInfo>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let area = scheduler.area_id.clone();
        let online: Vec<&NodeInfo> = nodes.iter().filter(|n| n.is_online()).collect();
        let snapshots: Vec<DeviceSnapshot> = online
            .iter()
            .map(|node| DeviceSnapshot::from_node(&area, node, at))
            .collect();
        let online_ids: Vec<String> = online.iter().map(|n| n.node_id.clone()).collect();

        let store = Arc::clone(&self.store);
        let job_area = area.clone();
        self.push(
            cancel,
            Job::new(format!("{area}: upsert {} devices", nodes.len()), move || async move {
                store.upsert_devices(&job_area, &nodes).await.map(|_| ())
            }),
        )
        .await?;

        // Snapshot and totals jobs are pushed even for an all-offline page;
        // the store treats empty batches as no-ops.
        let store = Arc::clone(&self.store);
        self.push(
            cancel,
            Job::new(
                format!("{area}: {} hourly snapshots", snapshots.len()),
                move || async move { store.insert_hourly_snapshots(&snapshots).await.map(|_| ()) },
            ),
        )
        .await?;

        let store = Arc::clone(&self.store);
        let day = at.date_naive();
        self.push(
            cancel,
            Job::new(format!("{area}: daily totals"), move || async move {
                store.refresh_daily_totals(&online_ids, day).await.map(|_| ())
            }),
        )
        .await
    }
}

#[async_trait]
impl Fetcher for NodeFetcher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(skip_all, fields(fetcher = Self::NAME, scheduler = %scheduler.id, area = %scheduler.area_id))]
    async fn fetch(&self, cancel: &CancellationToken, scheduler: &Scheduler) -> Result<()> {
        let started = Utc::now();
        let mut cursor = PageCursor::new(self.page_size);

        while let Some(request) = cursor.next_request() {
            let page = remote(cancel, "list nodes", scheduler.api.list_nodes(request)).await?;
            cursor.advance(page.len(), page.total);
            if page.is_empty() {
                break;
            }
            self.push_page(cancel, scheduler, page.data, started).await?;
        }

        debug!(
            devices = cursor.accumulated(),
            total = cursor.total().unwrap_or_default(),
            "node listing complete"
        );
        Ok(())
    }

    fn job_queue(&self) -> &JobQueue {
        self.base.job_queue()
    }

    fn has_finalize(&self) -> bool {
        true
    }

    async fn finalize(&self) -> Result<()> {
        let today = Utc::now().date_naive();
        self.store.refresh_online_counts().await?;
        let summary = self.store.refresh_reward_summary(today).await?;
        let ranked = self.store.refresh_daily_ranks(today).await?;
        info!(
            total_devices = summary.total_devices,
            online_devices = summary.online_devices,
            profit_today = summary.profit_today,
            ranked,
            "network summary refreshed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::StatisticConfig,
        fetcher::pagination::{PageRequest, RangeRequest},
        rpc::SchedulerApi,
        store::InMemoryStatsStore,
    };
    use chrono::TimeZone;
    use stratus_model::{
        AreaId, AssetRecord, NodeStatus, Page, ReplicaEvent, RetrievalEvent, SchedulerId,
        SystemInfo, ValidationResult,
    };

    #[derive(Debug)]
    struct NoApi;

    #[async_trait]
    impl SchedulerApi for NoApi {
        async fn list_nodes(&self, _page: PageRequest) -> Result<Page<NodeInfo>> {
            Ok(Page::default())
        }
        async fn list_assets(&self, _range: RangeRequest) -> Result<Page<AssetRecord>> {
            Ok(Page::default())
        }
        async fn list_replica_events(&self, _range: RangeRequest) -> Result<Page<ReplicaEvent>> {
            Ok(Page::default())
        }
        async fn list_validation_results(
            &self,
            _range: RangeRequest,
        ) -> Result<Page<ValidationResult>> {
            Ok(Page::default())
        }
        async fn list_retrieval_events(
            &self,
            _range: RangeRequest,
        ) -> Result<Page<RetrievalEvent>> {
            Ok(Page::default())
        }
        async fn system_info(&self) -> Result<SystemInfo> {
            Ok(SystemInfo::default())
        }
    }

    fn device(id: &str, status: NodeStatus, online_duration: i64) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            status,
            external_ip: String::new(),
            cpu_cores: 2,
            memory: 0.0,
            disk_space: 0.0,
            disk_usage: 10.0,
            bandwidth_up: 0,
            bandwidth_down: 0,
            online_duration,
            profit: 5.0,
            download_traffic: 0,
            upload_traffic: 0,
            last_seen: Utc::now(),
        }
    }

    fn fixture() -> (Arc<InMemoryStatsStore>, NodeFetcher, Scheduler) {
        let store = Arc::new(InMemoryStatsStore::new());
        let config = StatisticConfig {
            queue_capacity: 8,
            ..StatisticConfig::default()
        };
        let fetcher = NodeFetcher::new(&FetcherContext::new(store.clone(), config));
        let scheduler = Scheduler {
            id: SchedulerId::from("s1"),
            area_id: AreaId::from("eu"),
            url: "http://s1".into(),
            api: Arc::new(NoApi),
        };
        (store, fetcher, scheduler)
    }

    fn drain(fetcher: &NodeFetcher) -> Vec<Job> {
        let mut rx = fetcher.job_queue().take_receiver().expect("receiver");
        let mut jobs = Vec::new();
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    #[tokio::test]
    async fn page_splits_into_status_snapshot_and_totals_jobs() {
        let (store, fetcher, scheduler) = fixture();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();
        let page = vec![
            device("up-1", NodeStatus::Online, 120),
            device("down-1", NodeStatus::Offline, 40),
            device("up-2", NodeStatus::Online, 90),
        ];
        let cancel = CancellationToken::new();
        fetcher
            .push_page(&cancel, &scheduler, page, at)
            .await
            .unwrap();

        let mut jobs = drain(&fetcher).into_iter();
        assert_eq!(fetcher.job_queue().pushed(), 3);

        // Status upsert covers every device on the page.
        jobs.next().unwrap().run().await.unwrap();
        assert_eq!(store.device_count(), 3);
        assert_eq!(store.device("down-1").unwrap().0, AreaId::from("eu"));
        assert!(store.hourly_snapshots("up-1").is_empty());

        // Snapshots only for online devices, bucketed to the hour.
        jobs.next().unwrap().run().await.unwrap();
        let snapshots = store.hourly_snapshots("up-1");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].hour, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert_eq!(store.hourly_snapshots("up-2").len(), 1);
        assert!(store.hourly_snapshots("down-1").is_empty());

        // Totals for online devices only.
        jobs.next().unwrap().run().await.unwrap();
        let day = at.date_naive();
        assert!(store.daily_totals("up-1", day).is_some());
        assert!(store.daily_totals("up-2", day).is_some());
        assert!(store.daily_totals("down-1", day).is_none());
        assert!(jobs.next().is_none());
    }

    #[tokio::test]
    async fn all_offline_page_still_queues_every_job() {
        let (store, fetcher, scheduler) = fixture();
        let page = vec![device("down-1", NodeStatus::Offline, 0)];
        let cancel = CancellationToken::new();
        fetcher
            .push_page(&cancel, &scheduler, page, Utc::now())
            .await
            .unwrap();

        let jobs = drain(&fetcher);
        assert_eq!(jobs.len(), 3);
        for job in jobs {
            job.run().await.unwrap();
        }
        assert_eq!(store.device_count(), 1);
        assert!(store.hourly_snapshots("down-1").is_empty());
    }
}
