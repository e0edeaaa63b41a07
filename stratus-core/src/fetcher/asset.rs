use std::sync::Arc;

use async_trait::async_trait;
use stratus_model::AssetRecord;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{
    BaseFetcher, Fetcher, FetcherContext, RangeCursor, pagination::only_latest_known, remote,
};
use crate::{
    directory::Scheduler,
    error::Result,
    queue::{Job, JobQueue},
    store::StatsStore,
};

/// Stored-asset records, resumed from the newest asset end time we hold.
#[derive(Debug)]
pub struct AssetFetcher {
    base: BaseFetcher,
    store: Arc<dyn StatsStore>,
    page_size: i64,
}

impl AssetFetcher {
    pub const NAME: &'static str = "asset";

    pub fn new(ctx: &FetcherContext) -> Self {
        Self {
            base: BaseFetcher::new(Self::NAME, ctx.queue_capacity()),
            store: Arc::clone(&ctx.store),
            page_size: ctx.page_size(),
        }
    }
}

#[async_trait]
impl Fetcher for AssetFetcher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(skip_all, fields(fetcher = Self::NAME, scheduler = %scheduler.id, area = %scheduler.area_id))]
    async fn fetch(&self, cancel: &CancellationToken, scheduler: &Scheduler) -> Result<()> {
        let latest = self.store.latest_asset(&scheduler.area_id).await?;
        let mut cursor = RangeCursor::since(latest.as_ref().map(|a| a.end_time), self.page_size);
        let mut pages = 0usize;

        while let Some(request) = cursor.next_request() {
            let page = remote(cancel, "list assets", scheduler.api.list_assets(request)).await?;
            cursor.advance(page.len(), page.total);
            if page.is_empty() {
                break;
            }
            if only_latest_known(&page.data, latest.as_ref(), AssetRecord::same_version) {
                cursor.finish();
                break;
            }

            let store = Arc::clone(&self.store);
            let area = scheduler.area_id.clone();
            let assets = page.data;
            self.push(
                cancel,
                Job::new(format!("{area}: upsert {} assets", assets.len()), move || async move {
                    store.upsert_assets(&area, &assets).await.map(|_| ())
                }),
            )
            .await?;
            pages += 1;
        }

        debug!(
            since = %cursor.start(),
            assets = cursor.accumulated(),
            pages,
            "asset listing complete"
        );
        Ok(())
    }

    fn job_queue(&self) -> &JobQueue {
        self.base.job_queue()
    }
}
