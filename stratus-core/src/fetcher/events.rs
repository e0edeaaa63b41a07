//! Append-only event streams (replica, validation, retrieval).
//!
//! The three streams share one fetch loop, parameterized by an
//! [`EventSource`]. Each fetch resumes from the stream's persisted watermark,
//! stores only strictly newer events, and finishes by enqueueing one
//! compaction job that folds the raw rows into hourly summaries.

use std::{fmt, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use stratus_model::{EventKind, Page, ReplicaEvent, RetrievalEvent, ValidationResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{BaseFetcher, Fetcher, FetcherContext, RangeCursor, pagination::RangeRequest, remote};
use crate::{
    directory::Scheduler,
    error::Result,
    queue::{Job, JobQueue},
    rpc::SchedulerApi,
    store::{EventRows, StatsStore},
};

/// One event stream as exposed by the scheduler API.
pub trait EventSource: Send + Sync + 'static {
    const NAME: &'static str;
    const KIND: EventKind;

    type Record: Send + Sync + 'static;

    fn list(api: &dyn SchedulerApi, range: RangeRequest) -> BoxFuture<'_, Result<Page<Self::Record>>>;

    fn created_time(record: &Self::Record) -> DateTime<Utc>;

    fn into_rows(records: Vec<Self::Record>) -> EventRows;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaEvents;

impl EventSource for ReplicaEvents {
    const NAME: &'static str = "replica_events";
    const KIND: EventKind = EventKind::Replica;
    type Record = ReplicaEvent;

    fn list(api: &dyn SchedulerApi, range: RangeRequest) -> BoxFuture<'_, Result<Page<ReplicaEvent>>> {
        api.list_replica_events(range)
    }

    fn created_time(record: &ReplicaEvent) -> DateTime<Utc> {
        record.created_time
    }

    fn into_rows(records: Vec<ReplicaEvent>) -> EventRows {
        EventRows::Replica(records)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationEvents;

impl EventSource for ValidationEvents {
    const NAME: &'static str = "validation_events";
    const KIND: EventKind = EventKind::Validation;
    type Record = ValidationResult;

    fn list(
        api: &dyn SchedulerApi,
        range: RangeRequest,
    ) -> BoxFuture<'_, Result<Page<ValidationResult>>> {
        api.list_validation_results(range)
    }

    fn created_time(record: &ValidationResult) -> DateTime<Utc> {
        record.created_time
    }

    fn into_rows(records: Vec<ValidationResult>) -> EventRows {
        EventRows::Validation(records)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalEvents;

impl EventSource for RetrievalEvents {
    const NAME: &'static str = "retrieval_events";
    const KIND: EventKind = EventKind::Retrieval;
    type Record = RetrievalEvent;

    fn list(
        api: &dyn SchedulerApi,
        range: RangeRequest,
    ) -> BoxFuture<'_, Result<Page<RetrievalEvent>>> {
        api.list_retrieval_events(range)
    }

    fn created_time(record: &RetrievalEvent) -> DateTime<Utc> {
        record.created_time
    }

    fn into_rows(records: Vec<RetrievalEvent>) -> EventRows {
        EventRows::Retrieval(records)
    }
}

pub struct EventFetcher<S> {
    base: BaseFetcher,
    store: Arc<dyn StatsStore>,
    page_size: i64,
    _source: PhantomData<fn() -> S>,
}

impl<S: EventSource> fmt::Debug for EventFetcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFetcher")
            .field("stream", &S::KIND)
            .field("queue", &self.base.job_queue())
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl<S: EventSource> EventFetcher<S> {
    pub fn new(ctx: &FetcherContext) -> Self {
        Self {
            base: BaseFetcher::new(S::NAME, ctx.queue_capacity()),
            store: Arc::clone(&ctx.store),
            page_size: ctx.page_size(),
            _source: PhantomData,
        }
    }
}

#[async_trait]
impl<S: EventSource> Fetcher for EventFetcher<S> {
    fn name(&self) -> &'static str {
        S::NAME
    }

    #[instrument(skip_all, fields(fetcher = S::NAME, scheduler = %scheduler.id, area = %scheduler.area_id))]
    async fn fetch(&self, cancel: &CancellationToken, scheduler: &Scheduler) -> Result<()> {
        let mark = self
            .store
            .latest_event_time(S::KIND, &scheduler.area_id)
            .await?;
        let mut cursor = RangeCursor::since(mark, self.page_size);
        let mut newest: Option<DateTime<Utc>> = None;
        let mut stored = 0usize;

        while let Some(request) = cursor.next_request() {
            let page = remote(cancel, S::NAME, S::list(scheduler.api.as_ref(), request)).await?;
            cursor.advance(page.len(), page.total);
            if page.is_empty() {
                break;
            }

            // The window is inclusive of the mark, so drop what we already hold.
            let fresh: Vec<S::Record> = page
                .data
                .into_iter()
                .filter(|record| mark.is_none_or(|mark| S::created_time(record) > mark))
                .collect();
            // Results are ordered by creation time: a page with nothing past
            // the mark means the stream has not moved.
            if fresh.is_empty() {
                debug!(offset = request.cursor, "page holds only known events; stopping");
                break;
            }
            newest = fresh.iter().map(S::created_time).chain(newest).max();
            stored += fresh.len();

            let store = Arc::clone(&self.store);
            let area = scheduler.area_id.clone();
            let rows = S::into_rows(fresh);
            self.push(
                cancel,
                Job::new(format!("{area}: insert {} {}", rows.len(), S::NAME), move || async move {
                    store.insert_events(&area, &rows).await.map(|_| ())
                }),
            )
            .await?;
        }

        if let Some(until) = newest {
            let store = Arc::clone(&self.store);
            let area = scheduler.area_id.clone();
            self.push(
                cancel,
                Job::new(format!("{area}: compact {}", S::NAME), move || async move {
                    let stats = store.compact_events(S::KIND, &area, until).await?;
                    debug!(
                        stream = %S::KIND,
                        area = %area,
                        buckets = stats.buckets,
                        deleted = stats.deleted,
                        "events compacted"
                    );
                    Ok(())
                }),
            )
            .await?;
        }

        debug!(stored, since = ?mark, "event listing complete");
        Ok(())
    }

    fn job_queue(&self) -> &JobQueue {
        self.base.job_queue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::StatisticConfig,
        fetcher::pagination::PageRequest,
        store::InMemoryStatsStore,
    };
    use chrono::{Duration, TimeZone};
    use parking_lot::Mutex;
    use stratus_model::{
        AreaId, AssetRecord, NodeInfo, ReplicaStatus, SchedulerId, SystemInfo, ValidationStatus,
    };

    /// Serves canned replica and validation streams. `total` reports the
    /// whole stream regardless of the requested window.
    #[derive(Debug, Default)]
    struct StreamApi {
        replicas: Vec<ReplicaEvent>,
        validations: Vec<ValidationResult>,
        cursors: Mutex<Vec<i64>>,
    }

    fn window<T: Clone>(
        items: &[T],
        range: &RangeRequest,
        created: impl Fn(&T) -> DateTime<Utc>,
    ) -> Page<T> {
        let matching: Vec<T> = items
            .iter()
            .filter(|item| (range.start..=range.end).contains(&created(*item)))
            .cloned()
            .collect();
        let start = (range.cursor.max(0) as usize).min(matching.len());
        let end = (start + range.count.max(0) as usize).min(matching.len());
        Page::new(matching[start..end].to_vec(), items.len() as i64)
    }

    #[async_trait]
    impl SchedulerApi for StreamApi {
        async fn list_nodes(&self, _page: PageRequest) -> Result<Page<NodeInfo>> {
            Ok(Page::default())
        }
        async fn list_assets(&self, _range: RangeRequest) -> Result<Page<AssetRecord>> {
            Ok(Page::default())
        }
        async fn list_replica_events(&self, range: RangeRequest) -> Result<Page<ReplicaEvent>> {
            self.cursors.lock().push(range.cursor);
            Ok(window(&self.replicas, &range, |e| e.created_time))
        }
        async fn list_validation_results(
            &self,
            range: RangeRequest,
        ) -> Result<Page<ValidationResult>> {
            self.cursors.lock().push(range.cursor);
            Ok(window(&self.validations, &range, |e| e.created_time))
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

    fn mark() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn replica(hash: &str, at: DateTime<Utc>) -> ReplicaEvent {
        ReplicaEvent {
            node_id: "n-1".into(),
            cid: String::new(),
            hash: hash.into(),
            status: ReplicaStatus::Succeeded,
            done_size: 10,
            start_time: at,
            end_time: at,
            created_time: at,
        }
    }

    fn validation(id: i64, at: DateTime<Utc>) -> ValidationResult {
        ValidationResult {
            id,
            node_id: "n-1".into(),
            validator_id: "v-1".into(),
            cid: String::new(),
            status: ValidationStatus::Success,
            bandwidth: 1.0,
            duration: 5,
            created_time: at,
        }
    }

    fn scheduler(api: Arc<StreamApi>) -> Scheduler {
        Scheduler {
            id: SchedulerId::from("s1"),
            area_id: AreaId::from("eu"),
            url: "http://s1".into(),
            api,
        }
    }

    fn context(store: Arc<InMemoryStatsStore>, page_size: i64) -> FetcherContext {
        FetcherContext::new(
            store,
            StatisticConfig {
                page_size,
                queue_capacity: 8,
                ..StatisticConfig::default()
            },
        )
    }

    fn queued_labels<S: EventSource>(fetcher: &EventFetcher<S>) -> Vec<String> {
        let mut rx = fetcher.job_queue().take_receiver().expect("receiver");
        let mut labels = Vec::new();
        while let Ok(job) = rx.try_recv() {
            labels.push(job.label().to_string());
        }
        labels
    }

    #[tokio::test]
    async fn event_at_the_watermark_is_not_stored_again() {
        let store = Arc::new(InMemoryStatsStore::new());
        let area = AreaId::from("eu");
        store
            .insert_events(&area, &EventRows::Replica(vec![replica("h0", mark())]))
            .await
            .unwrap();

        let api = Arc::new(StreamApi {
            replicas: vec![
                replica("h0", mark()),
                replica("h1", mark() + Duration::minutes(1)),
                replica("h2", mark() + Duration::minutes(2)),
            ],
            ..StreamApi::default()
        });
        let fetcher = EventFetcher::<ReplicaEvents>::new(&context(store, 500));
        fetcher
            .fetch(&CancellationToken::new(), &scheduler(api.clone()))
            .await
            .unwrap();

        assert_eq!(
            queued_labels(&fetcher),
            vec![
                "eu: insert 2 replica_events".to_string(),
                "eu: compact replica_events".to_string(),
            ]
        );
        assert_eq!(*api.cursors.lock(), vec![0]);
    }

    #[tokio::test]
    async fn page_of_known_events_stops_pagination() {
        let store = Arc::new(InMemoryStatsStore::new());
        let area = AreaId::from("eu");
        store
            .insert_events(
                &area,
                &EventRows::Validation(vec![validation(1, mark()), validation(2, mark())]),
            )
            .await
            .unwrap();

        // Older history inflates the reported total past what the window holds.
        let mut validations: Vec<_> = (10..16)
            .map(|id| validation(id, mark() - Duration::hours(id)))
            .collect();
        validations.push(validation(1, mark()));
        validations.push(validation(2, mark()));
        let api = Arc::new(StreamApi {
            validations,
            ..StreamApi::default()
        });

        let fetcher = EventFetcher::<ValidationEvents>::new(&context(store, 2));
        fetcher
            .fetch(&CancellationToken::new(), &scheduler(api.clone()))
            .await
            .unwrap();

        assert_eq!(*api.cursors.lock(), vec![0]);
        assert!(queued_labels(&fetcher).is_empty());
    }
}
