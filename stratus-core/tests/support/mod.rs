#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use stratus_core::{
    FinalizeConfig, FinalizeMode, Result, StatsError,
    directory::{InMemorySchedulerCache, Scheduler, SchedulerDirectory},
    fetcher::{
        Fetcher,
        pagination::{PageRequest, RangeRequest},
    },
    queue::{Job, QueueWorker},
    registry::InMemoryServiceRegistry,
    rpc::{SchedulerApi, SchedulerConnector},
};
use stratus_model::{
    AreaId, AssetRecord, NodeInfo, NodeStatus, Page, ReplicaEvent, RetrievalEvent,
    SchedulerConfig, SchedulerId, SystemInfo, ValidationResult,
};
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

pub fn base_time() -> DateTime<Utc> {
    Utc::now() - Duration::days(2)
}

pub fn node(id: &str, online: bool) -> NodeInfo {
    NodeInfo {
        node_id: id.to_string(),
        status: if online {
            NodeStatus::Online
        } else {
            NodeStatus::Offline
        },
        external_ip: "10.0.0.1".into(),
        cpu_cores: 4,
        memory: 8.0e9,
        disk_space: 1.0e12,
        disk_usage: 40.0,
        bandwidth_up: 1_000,
        bandwidth_down: 1_000,
        online_duration: 600,
        profit: 12.5,
        download_traffic: 0,
        upload_traffic: 0,
        last_seen: Utc::now(),
    }
}

pub fn asset(i: i64, base: DateTime<Utc>) -> AssetRecord {
    AssetRecord {
        cid: format!("cid-{i}"),
        hash: format!("hash-{i}"),
        total_size: 1024,
        state: "Servicing".into(),
        replicas: 3,
        total_blocks: 4,
        created_time: base,
        end_time: base + Duration::seconds(i),
    }
}

pub fn retrieval(i: i64, base: DateTime<Utc>) -> RetrievalEvent {
    RetrievalEvent {
        token_id: format!("tok-{i}"),
        node_id: format!("n-{}", i % 3),
        client_id: "client".into(),
        cid: format!("cid-{i}"),
        size: 100,
        succeeded: i % 2 == 0,
        created_time: base + Duration::minutes(i),
    }
}

/// Scripted scheduler. Range listings honor `start..=end`; every call is
/// recorded.
#[derive(Default)]
pub struct FakeScheduler {
    pub nodes: Mutex<Vec<NodeInfo>>,
    pub assets: Mutex<Vec<AssetRecord>>,
    pub retrievals: Mutex<Vec<RetrievalEvent>>,
    pub calls: Mutex<Vec<(&'static str, i64)>>,
    pub node_calls: AtomicUsize,
    /// When set, `list_nodes` signals `entered` and then waits for `release`.
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
    /// Node listing offsets that fail once each.
    pub fail_nodes_at: Mutex<Vec<i64>>,
}

impl FakeScheduler {
    pub fn with_nodes(nodes: Vec<NodeInfo>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            ..Self::default()
        }
    }

    pub fn calls(&self, method: &str) -> Vec<i64> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, offset)| *offset)
            .collect()
    }

    fn page<T: Clone>(items: &[T], offset: i64, limit: i64) -> Page<T> {
        let start = (offset.max(0) as usize).min(items.len());
        let end = (start + limit.max(0) as usize).min(items.len());
        Page::new(items[start..end].to_vec(), items.len() as i64)
    }
}

#[async_trait]
impl SchedulerApi for FakeScheduler {
    async fn list_nodes(&self, page: PageRequest) -> Result<Page<NodeInfo>> {
        self.calls.lock().push(("nodes", page.offset));
        self.node_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        {
            let mut failing = self.fail_nodes_at.lock();
            if let Some(pos) = failing.iter().position(|offset| *offset == page.offset) {
                failing.remove(pos);
                return Err(StatsError::rpc("scheduler.ListNodes", "connection reset"));
            }
        }
        Ok(Self::page(&self.nodes.lock(), page.offset, page.limit))
    }

    async fn list_assets(&self, range: RangeRequest) -> Result<Page<AssetRecord>> {
        self.calls.lock().push(("assets", range.cursor));
        let mut matching: Vec<_> = self
            .assets
            .lock()
            .iter()
            .filter(|a| a.end_time >= range.start && a.end_time <= range.end)
            .cloned()
            .collect();
        matching.sort_by_key(|a| a.end_time);
        Ok(Self::page(&matching, range.cursor, range.count))
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

    async fn list_retrieval_events(&self, range: RangeRequest) -> Result<Page<RetrievalEvent>> {
        self.calls.lock().push(("retrievals", range.cursor));
        let mut matching: Vec<_> = self
            .retrievals
            .lock()
            .iter()
            .filter(|e| e.created_time >= range.start && e.created_time <= range.end)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.created_time);
        Ok(Self::page(&matching, range.cursor, range.count))
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        Ok(SystemInfo {
            edge_count: self.nodes.lock().len() as i64,
            ..SystemInfo::default()
        })
    }
}

/// Hands out pre-registered fakes by URL.
#[derive(Default)]
pub struct FakeConnector {
    apis: Mutex<HashMap<String, Arc<FakeScheduler>>>,
}

impl FakeConnector {
    pub fn add(&self, url: &str, api: Arc<FakeScheduler>) {
        self.apis.lock().insert(url.to_string(), api);
    }
}

impl SchedulerConnector for FakeConnector {
    fn connect(&self, config: &SchedulerConfig) -> Result<Arc<dyn SchedulerApi>> {
        self.apis
            .lock()
            .get(&config.url)
            .cloned()
            .map(|api| api as Arc<dyn SchedulerApi>)
            .ok_or_else(|| StatsError::InvalidConfig(format!("no fake for {}", config.url)))
    }
}

pub fn scheduler(id: &str, area: &str, api: Arc<FakeScheduler>) -> Scheduler {
    Scheduler {
        id: SchedulerId::from(id),
        area_id: AreaId::from(area),
        url: format!("http://{id}"),
        api,
    }
}

pub fn register(registry: &InMemoryServiceRegistry, id: &str, area: &str) {
    let config = SchedulerConfig {
        area_id: AreaId::from(area),
        url: format!("http://{id}"),
        access_token: "tok".into(),
    };
    registry.put(
        format!("/scheduler/{id}"),
        serde_json::to_vec(&config).expect("encode registration"),
    );
}

pub fn directory(
    registry: Arc<InMemoryServiceRegistry>,
    connector: Arc<FakeConnector>,
) -> Arc<SchedulerDirectory> {
    Arc::new(SchedulerDirectory::new(
        "scheduler",
        registry,
        connector,
        Arc::new(InMemorySchedulerCache::new()),
    ))
}

/// Attach a worker that never finalizes on idle.
pub fn attach_worker(fetcher: Arc<dyn Fetcher>, cancel: &CancellationToken) {
    let finalize = FinalizeConfig {
        mode: FinalizeMode::Cycle,
        ..FinalizeConfig::default()
    };
    QueueWorker::attach(fetcher, finalize, cancel.clone())
        .expect("queue has no worker yet")
        .spawn();
}

/// Wait until every job pushed so far has run.
pub async fn drain(fetcher: &dyn Fetcher, cancel: &CancellationToken) {
    let (tx, rx) = oneshot::channel();
    fetcher
        .push(
            cancel,
            Job::new("drain", move || async move {
                let _ = tx.send(());
                Ok(())
            }),
        )
        .await
        .expect("push drain marker");
    rx.await.expect("drain marker ran");
}
