//! Per-fetcher job queues.
//!
//! Every fetcher owns one bounded [`JobQueue`]. Fetch calls push [`Job`]s onto
//! it and a single [`QueueWorker`] drains it, so writes produced by one fetcher
//! reach the store in the order they were pushed.

mod worker;

pub use worker::*;

use std::{
    borrow::Cow,
    fmt,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StatsError};

pub type JobFuture = BoxFuture<'static, Result<()>>;

/// A deferred persistence operation.
///
/// The closure captures everything it needs to write one batch; running it
/// consumes the job.
pub struct Job {
    label: Cow<'static, str>,
    run: Box<dyn FnOnce() -> JobFuture + Send>,
}

impl Job {
    pub fn new<F, Fut>(label: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(move || -> JobFuture { Box::pin(f()) }),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn run(self) -> Result<()> {
        (self.run)().await
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Bounded FIFO of jobs with exactly one consumer.
pub struct JobQueue {
    name: &'static str,
    tx: mpsc::Sender<Job>,
    rx: Mutex<Option<mpsc::Receiver<Job>>>,
    pushed: AtomicU64,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.tx.max_capacity())
            .field("pushed", &self.pushed())
            .field("consumer_attached", &self.rx.lock().is_none())
            .finish()
    }
}

impl JobQueue {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name,
            tx,
            rx: Mutex::new(Some(rx)),
            pushed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue a job, waiting for a free slot.
    ///
    /// Returns [`StatsError::Cancelled`] if `cancel` fires first; the job is
    /// dropped in that case.
    pub async fn push(&self, cancel: &CancellationToken, job: Job) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StatsError::Cancelled(format!(
                "push to {} queue",
                self.name
            ))),
            sent = self.tx.send(job) => {
                sent.map_err(|_| StatsError::Internal(format!("{} queue is closed", self.name)))?;
                self.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Jobs buffered and not yet received by the worker.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total jobs accepted since the queue was created.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Hands out the consuming end. Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Job>> {
        self.rx.lock().take()
    }
}
