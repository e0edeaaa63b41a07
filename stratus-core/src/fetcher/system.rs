use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{BaseFetcher, Fetcher, FetcherContext, remote};
use crate::{
    directory::Scheduler,
    error::Result,
    queue::{Job, JobQueue},
    store::StatsStore,
};

/// Area-wide counters, one row per scheduler.
#[derive(Debug)]
pub struct SystemInfoFetcher {
    base: BaseFetcher,
    store: Arc<dyn StatsStore>,
}

impl SystemInfoFetcher {
    pub const NAME: &'static str = "system_info";

    pub fn new(ctx: &FetcherContext) -> Self {
        Self {
            base: BaseFetcher::new(Self::NAME, ctx.queue_capacity()),
            store: Arc::clone(&ctx.store),
        }
    }
}

#[async_trait]
impl Fetcher for SystemInfoFetcher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(skip_all, fields(fetcher = Self::NAME, scheduler = %scheduler.id))]
    async fn fetch(&self, cancel: &CancellationToken, scheduler: &Scheduler) -> Result<()> {
        let info = remote(cancel, "system info", scheduler.api.system_info()).await?;

        let store = Arc::clone(&self.store);
        let id = scheduler.id.clone();
        let area = scheduler.area_id.clone();
        self.push(
            cancel,
            Job::new(format!("{id}: system info"), move || async move {
                store.upsert_system_info(&id, &area, &info).await
            }),
        )
        .await
    }

    fn job_queue(&self) -> &JobQueue {
        self.base.job_queue()
    }
}
