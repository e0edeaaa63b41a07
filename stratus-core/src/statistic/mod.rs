//! Cron-driven, lock-guarded orchestration of every fetcher against every
//! scheduler.
//!
//! Each replica runs the same schedule. On a tick the replica that obtains
//! the tick lock snapshots the scheduler directory and runs one task per
//! scheduler; each task runs the fetchers sequentially. The lock is released
//! once every task returned. Persistence happens asynchronously on the
//! fetchers' queues, drained by one worker per fetcher started at boot.

mod maintenance;

pub use maintenance::*;

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use chrono::Utc;
use cron::Schedule;
use parking_lot::Mutex;
use tokio::{sync::oneshot, task::JoinHandle, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::{FinalizeMode, StatisticConfig},
    directory::{Scheduler, SchedulerDirectory},
    error::{Result, StatsError},
    fetcher::{Fetcher, FetcherContext, FetcherRegistry},
    lock::{Locker, spawn_renewal},
    queue::{Job, QueueWorker},
    store::StatsStore,
};

/// Lock key guarding the fetch tick.
pub const STATISTIC_LOCK_KEY: &str = "statistic";

fn maintenance_lock_key(task: &str) -> String {
    format!("maintenance:{task}")
}

/// Parse a seconds-resolution cron expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(expr)
        .map_err(|e| StatsError::InvalidConfig(format!("cron expression {expr:?}: {e}")))
}

/// Where the orchestrator is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Idle,
    LockAttempt,
    Skipped,
    Running,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub schedulers: usize,
    pub fetches: usize,
    pub failed_fetches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another replica holds the lock.
    Skipped,
    Completed(TickReport),
}

impl TickOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TickOutcome::Skipped)
    }
}

pub struct Statistic {
    config: StatisticConfig,
    directory: Arc<SchedulerDirectory>,
    locker: Arc<dyn Locker>,
    fetchers: Arc<[Arc<dyn Fetcher>]>,
    maintenance: Vec<Arc<dyn MaintenanceTask>>,
    schedule: Schedule,
    maintenance_schedule: Schedule,
    state: Mutex<TickState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statistic")
            .field("crontab", &self.config.crontab)
            .field("fetchers", &self.fetcher_names())
            .field("maintenance", &self.maintenance)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Statistic {
    pub fn builder() -> StatisticBuilder {
        StatisticBuilder::default()
    }

    pub fn config(&self) -> &StatisticConfig {
        &self.config
    }

    pub fn state(&self) -> TickState {
        *self.state.lock()
    }

    pub fn fetchers(&self) -> &[Arc<dyn Fetcher>] {
        &self.fetchers
    }

    pub fn fetcher_names(&self) -> Vec<&'static str> {
        self.fetchers.iter().map(|f| f.name()).collect()
    }

    pub fn directory(&self) -> &Arc<SchedulerDirectory> {
        &self.directory
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn set_state(&self, state: TickState) {
        *self.state.lock() = state;
    }

    /// Attach one worker to every fetcher queue.
    pub fn start_workers(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        for fetcher in self.fetchers.iter() {
            let worker = QueueWorker::attach(
                Arc::clone(fetcher),
                self.config.finalize,
                self.cancel.child_token(),
            )
            .ok_or_else(|| {
                StatsError::Internal(format!("{} queue already has a worker", fetcher.name()))
            })?;
            tasks.push(worker.spawn());
        }
        info!(workers = self.fetchers.len(), "job queue workers started");
        Ok(())
    }

    /// Start workers plus the fetch and maintenance cron loops.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.start_workers()?;

        let fetch_loop = {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let schedule = this.schedule.clone();
                cron_loop(schedule, this.cancel.clone(), "statistic", || {
                    let this = Arc::clone(&this);
                    async move {
                        if let Err(err) = this.run_once().await {
                            error!(error = %err, "statistic tick failed");
                        }
                    }
                })
                .await;
            })
        };

        let maintenance_loop = {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let schedule = this.maintenance_schedule.clone();
                cron_loop(schedule, this.cancel.clone(), "maintenance", || {
                    let this = Arc::clone(&this);
                    async move {
                        this.run_maintenance_once().await;
                    }
                })
                .await;
            })
        };

        let mut tasks = self.tasks.lock();
        tasks.push(fetch_loop);
        tasks.push(maintenance_loop);
        info!(
            crontab = %self.config.crontab,
            maintenance_crontab = %self.config.maintenance_crontab,
            "statistic scheduled"
        );
        Ok(())
    }

    /// One fetch tick: lock, fan out over the scheduler snapshot, wait,
    /// release.
    #[instrument(skip(self), fields(tick = %uuid::Uuid::now_v7()))]
    pub async fn run_once(&self) -> Result<TickOutcome> {
        self.set_state(TickState::LockAttempt);
        let lease = match self
            .locker
            .obtain(STATISTIC_LOCK_KEY, self.config.lock_ttl())
            .await
        {
            Ok(lease) => lease,
            Err(err) if err.is_lock_not_obtained() => {
                debug!("statistic lock held elsewhere; skipping tick");
                self.set_state(TickState::Skipped);
                self.set_state(TickState::Idle);
                return Ok(TickOutcome::Skipped);
            }
            Err(err) => {
                self.set_state(TickState::Idle);
                return Err(err);
            }
        };

        self.set_state(TickState::Running);
        let renewal_stop = CancellationToken::new();
        let renewal = self.config.renew_lock.then(|| {
            spawn_renewal(
                Arc::clone(&self.locker),
                lease.clone(),
                renewal_stop.clone(),
            )
        });

        let report = self.fan_out().await;
        if self.config.finalize.mode == FinalizeMode::Cycle {
            self.push_finalize_barriers().await;
        }

        renewal_stop.cancel();
        if let Some(handle) = renewal
            && let Err(err) = handle.await
        {
            warn!(error = %err, "lock renewal task ended abnormally");
        }
        if let Err(err) = self.locker.release(lease).await {
            warn!(error = %err, "failed to release statistic lock; it will expire");
        }
        self.set_state(TickState::Idle);

        info!(
            schedulers = report.schedulers,
            fetches = report.fetches,
            failed = report.failed_fetches,
            "statistic tick complete"
        );
        Ok(TickOutcome::Completed(report))
    }

    async fn fan_out(&self) -> TickReport {
        let schedulers = self.directory.snapshot();
        let mut report = TickReport {
            schedulers: schedulers.len(),
            ..TickReport::default()
        };

        let mut tasks = JoinSet::new();
        for scheduler in schedulers.iter().cloned() {
            let fetchers = Arc::clone(&self.fetchers);
            let cancel = self.cancel.child_token();
            tasks.spawn(run_scheduler(scheduler, fetchers, cancel));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((fetches, failed)) => {
                    report.fetches += fetches;
                    report.failed_fetches += failed;
                }
                Err(err) => error!(error = %err, "scheduler task panicked"),
            }
        }
        report
    }

    /// Queue each fetcher's finalize behind everything this tick pushed.
    async fn push_finalize_barriers(&self) {
        for fetcher in self.fetchers.iter().filter(|f| f.has_finalize()) {
            let target = Arc::clone(fetcher);
            let job = Job::new(format!("{}: finalize", fetcher.name()), move || async move {
                target.finalize().await
            });
            if let Err(err) = fetcher.push(&self.cancel, job).await {
                warn!(fetcher = fetcher.name(), error = %err, "could not queue finalize");
            }
        }
    }

    /// Resolve once every job queued so far has been executed.
    pub async fn flush(&self) -> Result<()> {
        let mut pending = Vec::with_capacity(self.fetchers.len());
        for fetcher in self.fetchers.iter() {
            let (tx, rx) = oneshot::channel();
            let marker = Job::new(format!("{}: flush", fetcher.name()), move || async move {
                let _ = tx.send(());
                Ok(())
            });
            fetcher.push(&self.cancel, marker).await?;
            pending.push((fetcher.name(), rx));
        }
        for (name, rx) in pending {
            rx.await
                .map_err(|_| StatsError::Cancelled(format!("{name} queue stopped before flush")))?;
        }
        Ok(())
    }

    /// Run every maintenance task once, each behind its own lock.
    pub async fn run_maintenance_once(&self) -> Vec<(&'static str, TickOutcome)> {
        let mut outcomes = Vec::with_capacity(self.maintenance.len());
        for task in &self.maintenance {
            let key = maintenance_lock_key(task.name());
            let lease = match self.locker.obtain(&key, self.config.lock_ttl()).await {
                Ok(lease) => lease,
                Err(err) if err.is_lock_not_obtained() => {
                    debug!(task = task.name(), "maintenance lock held elsewhere; skipping");
                    outcomes.push((task.name(), TickOutcome::Skipped));
                    continue;
                }
                Err(err) => {
                    error!(task = task.name(), error = %err, "maintenance lock failed");
                    continue;
                }
            };

            let failed = match task.run(&self.cancel).await {
                Ok(()) => 0,
                Err(err) => {
                    error!(task = task.name(), error = %err, "maintenance task failed");
                    1
                }
            };
            if let Err(err) = self.locker.release(lease).await {
                warn!(task = task.name(), error = %err, "failed to release maintenance lock");
            }
            outcomes.push((
                task.name(),
                TickOutcome::Completed(TickReport {
                    fetches: 1,
                    failed_fetches: failed,
                    ..TickReport::default()
                }),
            ));
        }
        outcomes
    }

    /// Cancel everything and wait for workers and loops to stop. Jobs still
    /// queued are abandoned.
    pub async fn shutdown(&self) {
        info!("shutting down statistic");
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "statistic task failed"),
                Err(_) => warn!("statistic task timed out during shutdown"),
            }
        }
        info!("statistic shutdown complete");
    }
}

/// Run every fetcher against one scheduler, in order. Returns
/// `(fetches attempted, fetches failed)`.
async fn run_scheduler(
    scheduler: Scheduler,
    fetchers: Arc<[Arc<dyn Fetcher>]>,
    cancel: CancellationToken,
) -> (usize, usize) {
    let mut attempted = 0;
    let mut failed = 0;
    for fetcher in fetchers.iter() {
        if cancel.is_cancelled() {
            break;
        }
        attempted += 1;
        match fetcher.fetch(&cancel, &scheduler).await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => break,
            Err(err) => {
                failed += 1;
                error!(
                    fetcher = fetcher.name(),
                    scheduler = %scheduler.id,
                    area = %scheduler.area_id,
                    error = %err,
                    "fetch failed; resuming next tick"
                );
            }
        }
    }
    (attempted, failed)
}

/// Sleep until each upcoming fire time of `schedule` and run `tick` inline,
/// so a slow tick swallows the fire times it overlaps.
async fn cron_loop<F, Fut>(schedule: Schedule, cancel: CancellationToken, what: &'static str, tick: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(loop_name = what, "cron schedule has no upcoming fire time");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(loop_name = what, next = %next, "waiting for next tick");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
        tick().await;
    }
}

/// Assembles a [`Statistic`] from its collaborators.
#[derive(Default)]
pub struct StatisticBuilder {
    config: StatisticConfig,
    directory: Option<Arc<SchedulerDirectory>>,
    locker: Option<Arc<dyn Locker>>,
    store: Option<Arc<dyn StatsStore>>,
    registry: Option<FetcherRegistry>,
    maintenance: Option<Vec<Arc<dyn MaintenanceTask>>>,
    cancel: Option<CancellationToken>,
}

impl fmt::Debug for StatisticBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl StatisticBuilder {
    pub fn config(mut self, config: StatisticConfig) -> Self {
        self.config = config;
        self
    }

    pub fn directory(mut self, directory: Arc<SchedulerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    pub fn store(mut self, store: Arc<dyn StatsStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Fetchers to run. Defaults to [`FetcherRegistry::with_defaults`].
    pub fn fetchers(mut self, registry: FetcherRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the default maintenance tasks.
    pub fn maintenance(mut self, tasks: Vec<Arc<dyn MaintenanceTask>>) -> Self {
        self.maintenance = Some(tasks);
        self
    }

    /// Parent token; cancelling it stops the built orchestrator.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Statistic> {
        let missing = |what: &str| StatsError::InvalidConfig(format!("statistic needs a {what}"));
        let directory = self.directory.ok_or_else(|| missing("scheduler directory"))?;
        let locker = self.locker.ok_or_else(|| missing("locker"))?;
        let store = self.store.ok_or_else(|| missing("store"))?;

        let schedule = parse_schedule(&self.config.crontab)?;
        let maintenance_schedule = parse_schedule(&self.config.maintenance_crontab)?;

        let registry = self.registry.unwrap_or_else(FetcherRegistry::with_defaults);
        let ctx = FetcherContext::new(Arc::clone(&store), self.config.clone());
        let fetchers: Arc<[Arc<dyn Fetcher>]> = registry.instantiate(&ctx).into();

        let maintenance = self.maintenance.unwrap_or_else(|| {
            vec![Arc::new(IncentiveEligibilityTask::new(
                Arc::clone(&store),
                self.config.incentive_min_online_minutes,
            )) as Arc<dyn MaintenanceTask>]
        });

        Ok(Statistic {
            config: self.config,
            directory,
            locker,
            fetchers,
            maintenance,
            schedule,
            maintenance_schedule,
            state: Mutex::new(TickState::Idle),
            cancel: self.cancel.map(|c| c.child_token()).unwrap_or_default(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}
