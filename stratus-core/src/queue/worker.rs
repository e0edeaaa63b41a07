use std::{sync::Arc, time::Instant};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::Job;
use crate::{
    config::{FinalizeConfig, FinalizeMode},
    fetcher::Fetcher,
};

/// Result of watching an empty queue for the confirmation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleCheck {
    /// The queue stayed empty for every observation.
    Confirmed,
    /// A job arrived before the window closed.
    Interrupted,
    Cancelled,
}

/// Sole consumer of one fetcher's queue.
pub struct QueueWorker {
    fetcher: Arc<dyn Fetcher>,
    receiver: mpsc::Receiver<Job>,
    finalize: FinalizeConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("fetcher", &self.fetcher.name())
            .field("finalize", &self.finalize)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl QueueWorker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        receiver: mpsc::Receiver<Job>,
        finalize: FinalizeConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            receiver,
            finalize,
            cancel,
        }
    }

    /// Take the fetcher's receiver and build a worker for it. Returns `None`
    /// when some other worker already owns the queue.
    pub fn attach(
        fetcher: Arc<dyn Fetcher>,
        finalize: FinalizeConfig,
        cancel: CancellationToken,
    ) -> Option<Self> {
        let receiver = fetcher.job_queue().take_receiver()?;
        Some(Self::new(fetcher, receiver, finalize, cancel))
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let name = self.fetcher.name();
        info!(fetcher = name, "job queue worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(job) => job,
                    None => break,
                },
            };

            execute(name, job).await;

            if !self.watches_idle() || !self.fetcher.job_queue().is_empty() {
                continue;
            }

            match self.confirm_idle().await {
                IdleCheck::Confirmed => self.run_finalize().await,
                IdleCheck::Interrupted => {
                    trace!(fetcher = name, "idle confirmation interrupted by new job");
                }
                IdleCheck::Cancelled => break,
            }
        }

        info!(
            fetcher = name,
            abandoned = self.fetcher.job_queue().len(),
            "job queue worker stopped"
        );
    }

    fn watches_idle(&self) -> bool {
        self.finalize.mode == FinalizeMode::Idle && self.fetcher.has_finalize()
    }

    /// Poll the queue length once per interval; succeed only after
    /// `confirmations` consecutive empty observations.
    async fn confirm_idle(&self) -> IdleCheck {
        let queue = self.fetcher.job_queue();
        for _ in 0..self.finalize.confirmations {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return IdleCheck::Cancelled,
                _ = tokio::time::sleep(self.finalize.poll_interval()) => {}
            }
            if !queue.is_empty() {
                return IdleCheck::Interrupted;
            }
        }
        IdleCheck::Confirmed
    }

    async fn run_finalize(&self) {
        let name = self.fetcher.name();
        let started = Instant::now();
        match self.fetcher.finalize().await {
            Ok(()) => info!(
                fetcher = name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "finalize completed"
            ),
            Err(err) => error!(fetcher = name, error = %err, "finalize failed"),
        }
    }
}

/// Run one job. Failures are logged and the job is dropped.
pub(crate) async fn execute(fetcher: &str, job: Job) {
    let label = job.label().to_string();
    let started = Instant::now();
    match job.run().await {
        Ok(()) => debug!(
            fetcher,
            job = %label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        ),
        Err(err) => error!(fetcher, job = %label, error = %err, "job failed"),
    }
}
