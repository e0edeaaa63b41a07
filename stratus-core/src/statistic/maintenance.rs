use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    error::Result,
    store::{StatsStore, hour_bucket},
};

/// Periodic housekeeping that runs on the maintenance schedule, each task
/// behind its own lock.
#[async_trait]
pub trait MaintenanceTask: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn run(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Marks devices that were online for at least `min_online_minutes` during
/// the previous full hour.
#[derive(Debug)]
pub struct IncentiveEligibilityTask {
    store: Arc<dyn StatsStore>,
    min_online_minutes: i64,
}

impl IncentiveEligibilityTask {
    pub const NAME: &'static str = "incentive_eligibility";

    pub fn new(store: Arc<dyn StatsStore>, min_online_minutes: i64) -> Self {
        Self {
            store,
            min_online_minutes,
        }
    }

    /// Start of the last hour that has fully elapsed at `now`.
    pub fn previous_hour(now: DateTime<Utc>) -> DateTime<Utc> {
        hour_bucket(now) - Duration::hours(1)
    }

    pub async fn run_for_hour(&self, hour: DateTime<Utc>) -> Result<u64> {
        let eligible = self
            .store
            .refresh_incentive_eligibility(hour, self.min_online_minutes)
            .await?;
        info!(%hour, eligible, min_online_minutes = self.min_online_minutes, "incentive eligibility computed");
        Ok(eligible)
    }
}

#[async_trait]
impl MaintenanceTask for IncentiveEligibilityTask {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, _cancel: &CancellationToken) -> Result<()> {
        self.run_for_hour(Self::previous_hour(Utc::now()))
            .await
            .map(|_| ())
    }
}
