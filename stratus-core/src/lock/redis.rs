use std::{fmt, time::Duration};

use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};
use tracing::{debug, info};

use super::{LockLease, Locker};
use crate::error::{Result, StatsError};

pub const LOCK_KEY_PREFIX: &str = "stratus:lock:";

mod scripts {
    use redis::Script;

    /// Delete the key only if it still holds our token.
    pub fn release() -> Script {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            "#,
        )
    }

    /// Extend the TTL only if the key still holds our token.
    pub fn refresh() -> Script {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('PEXPIRE', KEYS[1], ARGV[2])
            end
            return 0
            "#,
        )
    }
}

/// [`Locker`] over Redis `SET NX PX`.
#[derive(Clone)]
pub struct RedisLocker {
    conn: ConnectionManager,
    release: Script,
    refresh: Script,
}

impl fmt::Debug for RedisLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLocker")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisLocker {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release: scripts::release(),
            refresh: scripts::refresh(),
        }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to lock backend");
        Ok(Self::new(conn))
    }

    fn redis_key(key: &str) -> String {
        format!("{LOCK_KEY_PREFIX}{key}")
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl Locker for RedisLocker {
    async fn obtain(&self, key: &str, ttl: Duration) -> Result<LockLease> {
        let lease = LockLease::new(key, ttl);
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg(lease.token())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => {
                debug!(key, ttl_ms = ttl_millis(ttl), "lock obtained");
                Ok(lease)
            }
            None => Err(StatsError::LockNotObtained {
                key: key.to_string(),
            }),
        }
    }

    async fn refresh(&self, lease: &LockLease) -> Result<()> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .refresh
            .key(Self::redis_key(lease.key()))
            .arg(lease.token())
            .arg(ttl_millis(lease.ttl()))
            .invoke_async(&mut conn)
            .await?;
        if extended == 1 {
            Ok(())
        } else {
            Err(StatsError::LockNotObtained {
                key: lease.key().to_string(),
            })
        }
    }

    async fn release(&self, lease: LockLease) -> Result<()> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(Self::redis_key(lease.key()))
            .arg(lease.token())
            .invoke_async(&mut conn)
            .await?;
        debug!(key = lease.key(), released = deleted == 1, "lock released");
        Ok(())
    }
}
