//! Live set of schedulers, resolved from the coordination service.
//!
//! A run takes a [`SchedulerDirectory::snapshot`] once and works from that
//! `Arc` for its whole duration. Topology changes build a fresh list and swap
//! it in, so an in-flight run never observes a partial update and schedulers
//! it already holds stay usable until the run drops them.

mod cache;

pub use cache::*;

use std::{fmt, sync::Arc};

use futures::StreamExt;
use parking_lot::Mutex;
use stratus_model::{AreaId, SchedulerConfig, SchedulerId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::Result,
    registry::{ServiceRegistry, registration_id},
    rpc::{SchedulerApi, SchedulerConnector},
};

/// One scheduler endpoint with a ready client.
///
/// Cloning is cheap; the client is closed when the last clone drops.
#[derive(Clone)]
pub struct Scheduler {
    pub id: SchedulerId,
    pub area_id: AreaId,
    pub url: String,
    pub api: Arc<dyn SchedulerApi>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.id)
            .field("area_id", &self.area_id)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

pub struct SchedulerDirectory {
    service_type: String,
    registry: Arc<dyn ServiceRegistry>,
    connector: Arc<dyn SchedulerConnector>,
    cache: Arc<dyn SchedulerConfigCache>,
    current: Mutex<Arc<Vec<Scheduler>>>,
    /// One reload at a time, so the last list swapped in is the newest.
    reload: tokio::sync::Mutex<()>,
}

impl fmt::Debug for SchedulerDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerDirectory")
            .field("service_type", &self.service_type)
            .field("schedulers", &self.current.lock().len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SchedulerDirectory {
    pub fn new(
        service_type: impl Into<String>,
        registry: Arc<dyn ServiceRegistry>,
        connector: Arc<dyn SchedulerConnector>,
        cache: Arc<dyn SchedulerConfigCache>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            registry,
            connector,
            cache,
            current: Mutex::new(Arc::new(Vec::new())),
            reload: tokio::sync::Mutex::new(()),
        }
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// The schedulers as of the last successful load.
    pub fn snapshot(&self) -> Arc<Vec<Scheduler>> {
        Arc::clone(&self.current.lock())
    }

    pub fn by_area(&self, area_id: &AreaId) -> Vec<Scheduler> {
        self.snapshot()
            .iter()
            .filter(|s| &s.area_id == area_id)
            .cloned()
            .collect()
    }

    /// Rebuild the scheduler list from the coordination service and swap it
    /// in.
    ///
    /// Entries that fail to decode or connect are skipped with a warning;
    /// only failing to list the namespace is an error. Concurrent calls run
    /// one after another.
    #[instrument(skip(self), fields(service_type = %self.service_type))]
    pub async fn load_all(&self) -> Result<Arc<Vec<Scheduler>>> {
        let _reload = self.reload.lock().await;
        let registrations = self.registry.list(&self.service_type).await?;

        let mut schedulers = Vec::with_capacity(registrations.len());
        let mut groups = AreaGroups::new();
        for registration in registrations {
            let id = SchedulerId::new(registration_id(&self.service_type, &registration.key));
            let config: SchedulerConfig = match serde_json::from_slice(&registration.value) {
                Ok(config) => config,
                Err(err) => {
                    warn!(key = %registration.key, error = %err, "skipping undecodable scheduler registration");
                    continue;
                }
            };
            let api = match self.connector.connect(&config) {
                Ok(api) => api,
                Err(err) => {
                    warn!(scheduler = %id, url = %config.url, error = %err, "skipping scheduler that cannot be connected");
                    continue;
                }
            };

            schedulers.push(Scheduler {
                id: id.clone(),
                area_id: config.area_id.clone(),
                url: config.url.clone(),
                api,
            });
            groups
                .entry(config.area_id.clone())
                .or_default()
                .push((id, config));
        }
        schedulers.sort_by(|a, b| a.id.cmp(&b.id));

        if let Err(err) = self.cache.replace_all(&groups).await {
            warn!(error = %err, "failed to publish scheduler topology to cache");
        }

        let snapshot = Arc::new(schedulers);
        *self.current.lock() = Arc::clone(&snapshot);
        info!(
            schedulers = snapshot.len(),
            areas = groups.len(),
            "scheduler directory loaded"
        );
        Ok(snapshot)
    }

    /// Follow registration changes, reloading on every event, until the
    /// stream ends or `cancel` fires. An error in the stream ends the watch.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let mut events = self.registry.watch(&self.service_type).await?;
        info!(service_type = %self.service_type, "watching scheduler registrations");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    debug!(kind = ?event.kind, key = %event.key, "scheduler registration changed");
                    if let Err(err) = self.load_all().await {
                        warn!(error = %err, "reloading scheduler directory failed");
                    }
                }
                Some(Err(err)) => return Err(err),
                None => {
                    info!(service_type = %self.service_type, "scheduler watch stream ended");
                    return Ok(());
                }
            }
        }
    }

    pub fn spawn_watch(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.watch(cancel).await {
                error!(error = %err, "scheduler watch failed; topology updates stopped");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::StatsError,
        fetcher::pagination::{PageRequest, RangeRequest},
        registry::InMemoryServiceRegistry,
    };
    use async_trait::async_trait;
    use stratus_model::{
        AssetRecord, NodeInfo, Page, ReplicaEvent, RetrievalEvent, SystemInfo, ValidationResult,
    };

    #[derive(Debug)]
    struct NullApi;

    #[async_trait]
    impl SchedulerApi for NullApi {
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

    struct NullConnector;

    impl SchedulerConnector for NullConnector {
        fn connect(&self, config: &SchedulerConfig) -> Result<Arc<dyn SchedulerApi>> {
            if config.url.starts_with("http") {
                Ok(Arc::new(NullApi))
            } else {
                Err(StatsError::InvalidConfig(format!("bad url {}", config.url)))
            }
        }
    }

    fn registration(area: &str, url: &str) -> Vec<u8> {
        serde_json::to_vec(&SchedulerConfig {
            area_id: AreaId::from(area),
            url: url.to_string(),
            access_token: "tok".into(),
        })
        .unwrap()
    }

    fn directory(registry: Arc<InMemoryServiceRegistry>) -> (SchedulerDirectory, Arc<InMemorySchedulerCache>) {
        let cache = Arc::new(InMemorySchedulerCache::new());
        let dir = SchedulerDirectory::new("scheduler", registry, Arc::new(NullConnector), cache.clone());
        (dir, cache)
    }

    #[tokio::test]
    async fn load_all_skips_bad_entries_and_groups_by_area() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        registry.put("/scheduler/s1", registration("eu", "http://s1"));
        registry.put("/scheduler/s2", registration("eu", "http://s2"));
        registry.put("/scheduler/s3", registration("us", "ftp://s3"));
        registry.put("/scheduler/s4", b"{not json".to_vec());

        let (dir, cache) = directory(registry);
        let snapshot = dir.load_all().await.unwrap();

        let ids: Vec<_> = snapshot.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(dir.by_area(&AreaId::from("eu")).len(), 2);
        assert_eq!(cache.areas(), vec![AreaId::from("eu")]);
    }

    #[tokio::test]
    async fn old_snapshot_is_untouched_by_reload() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        registry.put("/scheduler/a", registration("eu", "http://a"));
        registry.put("/scheduler/b", registration("us", "http://b"));

        let (dir, _) = directory(registry.clone());
        let before = dir.load_all().await.unwrap();
        registry.delete("/scheduler/b");
        dir.load_all().await.unwrap();

        assert_eq!(before.len(), 2);
        assert_eq!(before[1].area_id.as_str(), "us");
        assert_eq!(dir.snapshot().len(), 1);
    }

    /// Holds the first `list` call open until released.
    struct HeldRegistry {
        inner: Arc<InMemoryServiceRegistry>,
        gate: parking_lot::Mutex<Option<(Arc<tokio::sync::Notify>, Arc<tokio::sync::Notify>)>>,
    }

    #[async_trait]
    impl ServiceRegistry for HeldRegistry {
        async fn list(&self, service_type: &str) -> Result<Vec<crate::registry::Registration>> {
            let listed = self.inner.list(service_type).await?;
            let gate = self.gate.lock().take();
            if let Some((entered, release)) = gate {
                entered.notify_one();
                release.notified().await;
            }
            Ok(listed)
        }

        async fn watch(&self, service_type: &str) -> Result<crate::registry::WatchStream> {
            self.inner.watch(service_type).await
        }
    }

    #[tokio::test]
    async fn overlapping_reloads_leave_the_newest_list() {
        let inner = Arc::new(InMemoryServiceRegistry::new());
        inner.put("/scheduler/a", registration("eu", "http://a"));
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let registry = Arc::new(HeldRegistry {
            inner: inner.clone(),
            gate: parking_lot::Mutex::new(Some((entered.clone(), release.clone()))),
        });
        let dir = Arc::new(SchedulerDirectory::new(
            "scheduler",
            registry,
            Arc::new(NullConnector),
            Arc::new(InMemorySchedulerCache::new()),
        ));

        // The first reload has listed only `a` and is stalled.
        let stale = tokio::spawn({
            let dir = Arc::clone(&dir);
            async move { dir.load_all().await.map(|s| s.len()) }
        });
        entered.notified().await;

        inner.put("/scheduler/b", registration("us", "http://b"));
        let fresh = tokio::spawn({
            let dir = Arc::clone(&dir);
            async move { dir.load_all().await.map(|s| s.len()) }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!fresh.is_finished());

        release.notify_one();
        assert_eq!(stale.await.unwrap().unwrap(), 1);
        assert_eq!(fresh.await.unwrap().unwrap(), 2);
        assert_eq!(dir.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn lagging_watch_still_converges() {
        let registry = Arc::new(InMemoryServiceRegistry::with_watch_buffer(1));
        let (dir, _) = directory(registry.clone());
        let dir = Arc::new(dir);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let dir = Arc::clone(&dir);
            let cancel = cancel.clone();
            async move { dir.watch(cancel).await }
        });

        // The watch subscribes asynchronously; write until it reacts.
        for attempt in 0..50 {
            registry.put(format!("/scheduler/ready{attempt}"), registration("eu", "http://r"));
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if !dir.snapshot().is_empty() {
                break;
            }
        }

        // A burst larger than the watch buffer.
        for i in 0..5 {
            registry.put(format!("/scheduler/s{i}"), registration("us", "http://s"));
        }
        let expected = registry.list("scheduler").await.unwrap().len();
        for _ in 0..50 {
            if dir.snapshot().len() == expected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(dir.snapshot().len(), expected);
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn watch_reloads_on_change_and_returns_when_stream_ends() {
        let registry = Arc::new(InMemoryServiceRegistry::new());
        registry.put("/scheduler/a", registration("eu", "http://a"));
        let (dir, _) = directory(registry.clone());
        dir.load_all().await.unwrap();
        let dir = Arc::new(dir);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let dir = Arc::clone(&dir);
            let cancel = cancel.clone();
            async move { dir.watch(cancel).await }
        });
        tokio::task::yield_now().await;

        // The watch subscribes asynchronously; keep writing until it sees one.
        for attempt in 0..50 {
            registry.put(format!("/scheduler/n{attempt}"), registration("us", "http://n"));
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if dir.snapshot().len() > 1 {
                break;
            }
        }
        assert!(dir.snapshot().len() > 1);

        registry.close_watches();
        handle.await.unwrap().unwrap();
    }
}
