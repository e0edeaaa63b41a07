use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the statistics pipeline.
///
/// All fields carry defaults so deployments only override what they need.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticConfig {
    /// Master switch. When false the host never starts the pipeline.
    pub enable: bool,
    /// Seconds-resolution cron expression for the fetch cycle.
    pub crontab: String,
    /// Cron expression for the maintenance tick (incentive eligibility).
    pub maintenance_crontab: String,
    /// TTL of the distributed lock taken for each tick (seconds).
    pub lock_ttl_secs: u64,
    /// Refresh the lock every `lock_ttl / 3` while a tick is running.
    pub renew_lock: bool,
    /// Records requested per page from a scheduler.
    pub page_size: i64,
    /// Capacity of every fetcher's job queue.
    pub queue_capacity: usize,
    /// Per-call timeout for scheduler RPC (seconds).
    pub rpc_timeout_secs: u64,
    /// Minimum minutes online within an hour for a device to be incentive eligible.
    pub incentive_min_online_minutes: i64,
    pub finalize: FinalizeConfig,
}

impl Default for StatisticConfig {
    fn default() -> Self {
        Self {
            enable: true,
            crontab: "0 */5 * * * *".to_string(),
            maintenance_crontab: "0 0 * * * *".to_string(),
            lock_ttl_secs: 600,
            renew_lock: true,
            page_size: 500,
            queue_capacity: 1,
            rpc_timeout_secs: 30,
            incentive_min_online_minutes: 50,
            finalize: FinalizeConfig::default(),
        }
    }
}

impl StatisticConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// How the pipeline decides that a fetcher's cycle has drained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeMode {
    /// Finalize once the queue has stayed empty for `confirmations` polls.
    #[default]
    Idle,
    /// Finalize after every scheduler's fetch for the tick returned and the
    /// queue drained everything pushed before the barrier.
    Cycle,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    pub mode: FinalizeMode,
    /// Interval between queue-length observations (milliseconds).
    pub poll_interval_ms: u64,
    /// Consecutive empty observations required before finalizing.
    pub confirmations: u32,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            mode: FinalizeMode::Idle,
            poll_interval_ms: 1_000,
            confirmations: 10,
        }
    }
}

impl FinalizeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Length of the idle window that must elapse before finalizing.
    pub fn idle_window(&self) -> Duration {
        self.poll_interval() * self.confirmations
    }
}
