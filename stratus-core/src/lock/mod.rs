//! Distributed mutual exclusion between replicas.
//!
//! Every replica runs the same cron schedule; the tick lock decides which one
//! does the work. A lease that is not released (crashed replica) expires after
//! its TTL.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::*;
#[cfg(feature = "redis")]
pub use self::redis::*;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Proof of holding a named lock until `ttl` elapses.
#[derive(Clone, PartialEq, Eq)]
pub struct LockLease {
    key: String,
    token: String,
    ttl: Duration,
}

impl fmt::Debug for LockLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockLease")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl LockLease {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            token: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[async_trait]
pub trait Locker: Send + Sync + fmt::Debug {
    /// Take `key` for `ttl`. Fails with
    /// [`crate::error::StatsError::LockNotObtained`] while someone else holds it.
    async fn obtain(&self, key: &str, ttl: Duration) -> Result<LockLease>;

    /// Push the expiry of a held lease out by its TTL. Fails with
    /// `LockNotObtained` if the lease was lost in the meantime.
    async fn refresh(&self, lease: &LockLease) -> Result<()>;

    /// Give the lock up. Releasing a lease that already expired is not an
    /// error.
    async fn release(&self, lease: LockLease) -> Result<()>;
}

/// Refresh `lease` every `ttl / 3` until `stop` fires.
///
/// A failed refresh is logged and renewal continues; the run the lease guards
/// is not interrupted.
pub fn spawn_renewal(
    locker: Arc<dyn Locker>,
    lease: LockLease,
    stop: CancellationToken,
) -> JoinHandle<()> {
    let period = (lease.ttl() / 3).max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match locker.refresh(&lease).await {
                Ok(()) => debug!(key = lease.key(), "lock lease refreshed"),
                Err(err) => warn!(key = lease.key(), error = %err, "lock lease refresh failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn renewal_keeps_lease_alive_past_ttl() {
        let locker = Arc::new(InMemoryLocker::new());
        let ttl = Duration::from_secs(30);
        let lease = locker.obtain("tick", ttl).await.unwrap();

        let stop = CancellationToken::new();
        let handle = spawn_renewal(locker.clone(), lease.clone(), stop.clone());

        tokio::time::sleep(ttl * 3).await;
        assert!(locker.obtain("tick", ttl).await.unwrap_err().is_lock_not_obtained());

        stop.cancel();
        handle.await.unwrap();
        tokio::time::sleep(ttl + Duration::from_secs(1)).await;
        assert!(locker.obtain("tick", ttl).await.is_ok());
    }
}
