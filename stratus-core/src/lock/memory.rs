use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{LockLease, Locker};
use crate::error::{Result, StatsError};

/// Locker for a single process, or several orchestrators sharing one `Arc`
/// in tests. Expiry follows tokio's clock so paused-time tests can age leases.
#[derive(Debug, Default)]
pub struct InMemoryLocker {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

#[async_trait]
impl Locker for InMemoryLocker {
    async fn obtain(&self, key: &str, ttl: Duration) -> Result<LockLease> {
        let now = Instant::now();
        let mut held = self.held.lock();
        if let Some((_, expires)) = held.get(key)
            && *expires > now
        {
            return Err(StatsError::LockNotObtained {
                key: key.to_string(),
            });
        }
        let lease = LockLease::new(key, ttl);
        held.insert(key.to_string(), (lease.token().to_string(), now + ttl));
        Ok(lease)
    }

    async fn refresh(&self, lease: &LockLease) -> Result<()> {
        let now = Instant::now();
        let mut held = self.held.lock();
        match held.get_mut(lease.key()) {
            Some((token, expires)) if token == lease.token() && *expires > now => {
                *expires = now + lease.ttl();
                Ok(())
            }
            _ => Err(StatsError::LockNotObtained {
                key: lease.key().to_string(),
            }),
        }
    }

    async fn release(&self, lease: LockLease) -> Result<()> {
        let mut held = self.held.lock();
        if held
            .get(lease.key())
            .is_some_and(|(token, _)| token == lease.token())
        {
            held.remove(lease.key());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_obtain_fails_until_release_or_expiry() {
        let locker = InMemoryLocker::new();
        let ttl = Duration::from_secs(10);

        let lease = locker.obtain("k", ttl).await.unwrap();
        let err = locker.obtain("k", ttl).await.unwrap_err();
        assert!(err.is_lock_not_obtained());

        locker.release(lease).await.unwrap();
        let lease = locker.obtain("k", ttl).await.unwrap();

        tokio::time::sleep(ttl + Duration::from_millis(1)).await;
        assert!(!locker.is_held("k"));
        assert!(locker.refresh(&lease).await.unwrap_err().is_lock_not_obtained());
        locker.obtain("k", ttl).await.unwrap();
    }

    #[tokio::test]
    async fn stale_lease_cannot_release_new_holder() {
        let locker = InMemoryLocker::new();
        let ttl = Duration::from_secs(10);
        let first = locker.obtain("k", ttl).await.unwrap();
        let copy = first.clone();
        locker.release(first).await.unwrap();
        let _second = locker.obtain("k", ttl).await.unwrap();

        locker.release(copy).await.unwrap();
        assert!(locker.is_held("k"));
    }
}
