//! Pluggable fetchers.
//!
//! A fetcher knows how to pull one category of data from one scheduler and
//! turn it into persistence [`Job`]s on its own queue. The orchestrator never
//! talks to the store directly; everything it writes flows through here.

pub mod asset;
pub mod events;
pub mod node;
pub mod pagination;
pub mod system;

pub use asset::AssetFetcher;
pub use events::{EventFetcher, EventSource, ReplicaEvents, RetrievalEvents, ValidationEvents};
pub use node::NodeFetcher;
pub use pagination::{PageCursor, PageRequest, RangeCursor};
pub use system::SystemInfoFetcher;

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    config::StatisticConfig,
    directory::Scheduler,
    error::{Result, StatsError},
    queue::{Job, JobQueue},
    store::StatsStore,
};

#[async_trait]
pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Stable name used in logs and as the queue name.
    fn name(&self) -> &'static str;

    /// Pull one cycle of data from `scheduler` and enqueue the writes.
    async fn fetch(&self, cancel: &CancellationToken, scheduler: &Scheduler) -> Result<()>;

    fn job_queue(&self) -> &JobQueue;

    /// Enqueue a job. Waits for queue space but never past cancellation.
    async fn push(&self, cancel: &CancellationToken, job: Job) -> Result<()> {
        self.job_queue().push(cancel, job).await
    }

    /// Whether [`Fetcher::finalize`] does anything. Workers skip idle
    /// detection for fetchers that return `false`.
    fn has_finalize(&self) -> bool {
        false
    }

    /// Cross-cutting rollup run once this cycle's jobs have drained.
    async fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

/// Await a scheduler call unless `cancel` fires first.
pub(crate) async fn remote<T>(
    cancel: &CancellationToken,
    what: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StatsError::Cancelled(what.to_string())),
        result = call => result,
    }
}

/// Shared state every concrete fetcher embeds: its job queue.
#[derive(Debug)]
pub struct BaseFetcher {
    queue: JobQueue,
}

impl BaseFetcher {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            queue: JobQueue::new(name, capacity),
        }
    }

    pub fn job_queue(&self) -> &JobQueue {
        &self.queue
    }
}

/// Dependencies handed to fetcher constructors.
#[derive(Clone)]
pub struct FetcherContext {
    pub store: Arc<dyn StatsStore>,
    pub config: StatisticConfig,
}

impl fmt::Debug for FetcherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FetcherContext {
    pub fn new(store: Arc<dyn StatsStore>, config: StatisticConfig) -> Self {
        Self { store, config }
    }

    pub fn page_size(&self) -> i64 {
        self.config.page_size.max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity.max(1)
    }
}

type FetcherConstructor = Box<dyn Fn(&FetcherContext) -> Arc<dyn Fetcher> + Send + Sync>;

/// Ordered list of fetcher constructors.
///
/// Built explicitly and handed to the orchestrator builder; each entry is
/// instantiated exactly once when the orchestrator is built.
#[derive(Default)]
pub struct FetcherRegistry {
    entries: Vec<(&'static str, FetcherConstructor)>,
}

impl fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in fetcher, in the order they run against a
    /// scheduler.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(NodeFetcher::NAME, |ctx| Arc::new(NodeFetcher::new(ctx)))
            .register(AssetFetcher::NAME, |ctx| Arc::new(AssetFetcher::new(ctx)))
            .register(ReplicaEvents::NAME, |ctx| {
                Arc::new(EventFetcher::<ReplicaEvents>::new(ctx))
            })
            .register(ValidationEvents::NAME, |ctx| {
                Arc::new(EventFetcher::<ValidationEvents>::new(ctx))
            })
            .register(RetrievalEvents::NAME, |ctx| {
                Arc::new(EventFetcher::<RetrievalEvents>::new(ctx))
            })
            .register(SystemInfoFetcher::NAME, |ctx| {
                Arc::new(SystemInfoFetcher::new(ctx))
            });
        registry
    }

    /// Add a constructor. A later registration under an existing name
    /// replaces the earlier one in place.
    pub fn register<F>(&mut self, name: &'static str, constructor: F) -> &mut Self
    where
        F: Fn(&FetcherContext) -> Arc<dyn Fetcher> + Send + Sync + 'static,
    {
        let constructor: FetcherConstructor = Box::new(constructor);
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = constructor,
            None => self.entries.push((name, constructor)),
        }
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn instantiate(&self, ctx: &FetcherContext) -> Vec<Arc<dyn Fetcher>> {
        self.entries
            .iter()
            .map(|(_, constructor)| constructor(ctx))
            .collect()
    }
}
