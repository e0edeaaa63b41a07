use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use parking_lot::Mutex;
use stratus_model::{AreaId, SchedulerConfig, SchedulerId};

use crate::error::Result;

/// Scheduler registrations grouped by area.
pub type AreaGroups = BTreeMap<AreaId, Vec<(SchedulerId, SchedulerConfig)>>;

/// Shared "which scheduler serves area X" lookup for other processes.
#[async_trait]
pub trait SchedulerConfigCache: Send + Sync + fmt::Debug {
    /// Replace the cached topology with `groups`. Areas missing from `groups`
    /// are dropped.
    async fn replace_all(&self, groups: &AreaGroups) -> Result<()>;

    async fn lookup(&self, area_id: &AreaId) -> Result<Vec<SchedulerConfig>>;
}

#[derive(Debug, Default)]
pub struct InMemorySchedulerCache {
    groups: Mutex<AreaGroups>,
}

impl InMemorySchedulerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn areas(&self) -> Vec<AreaId> {
        self.groups.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl SchedulerConfigCache for InMemorySchedulerCache {
    async fn replace_all(&self, groups: &AreaGroups) -> Result<()> {
        *self.groups.lock() = groups.clone();
        Ok(())
    }

    async fn lookup(&self, area_id: &AreaId) -> Result<Vec<SchedulerConfig>> {
        Ok(self
            .groups
            .lock()
            .get(area_id)
            .map(|entries| entries.iter().map(|(_, cfg)| cfg.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_cache::RedisSchedulerCache;

#[cfg(feature = "redis")]
mod redis_cache {
    use std::{collections::HashMap, fmt};

    use async_trait::async_trait;
    use redis::{AsyncCommands, aio::ConnectionManager};
    use stratus_model::{AreaId, SchedulerConfig};
    use tracing::{debug, warn};

    use super::{AreaGroups, SchedulerConfigCache};
    use crate::error::Result;

    const AREA_INDEX_KEY: &str = "stratus:schedulers:areas";

    fn area_key(area_id: &AreaId) -> String {
        format!("stratus:schedulers:area:{area_id}")
    }

    /// One Redis hash per area (`scheduler id -> JSON config`) plus a set
    /// indexing the areas currently present.
    #[derive(Clone)]
    pub struct RedisSchedulerCache {
        conn: ConnectionManager,
    }

    impl fmt::Debug for RedisSchedulerCache {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RedisSchedulerCache")
                .field("connection", &"ConnectionManager")
                .finish()
        }
    }

    impl RedisSchedulerCache {
        pub fn new(conn: ConnectionManager) -> Self {
            Self { conn }
        }
    }

    #[async_trait]
    impl SchedulerConfigCache for RedisSchedulerCache {
        async fn replace_all(&self, groups: &AreaGroups) -> Result<()> {
            let mut conn = self.conn.clone();
            let previous: Vec<String> = conn.smembers(AREA_INDEX_KEY).await?;

            let mut pipe = redis::pipe();
            pipe.atomic();
            for area in &previous {
                pipe.cmd("DEL")
                    .arg(area_key(&AreaId::new(area.as_str())))
                    .ignore();
            }
            pipe.cmd("DEL").arg(AREA_INDEX_KEY).ignore();

            for (area, entries) in groups {
                if entries.is_empty() {
                    continue;
                }
                let key = area_key(area);
                let mut hset = redis::cmd("HSET");
                hset.arg(&key);
                for (id, config) in entries {
                    hset.arg(id.as_str()).arg(serde_json::to_string(config)?);
                }
                pipe.add_command(hset).ignore();
                pipe.cmd("SADD").arg(AREA_INDEX_KEY).arg(area.as_str()).ignore();
            }

            pipe.query_async::<()>(&mut conn).await?;
            debug!(areas = groups.len(), "scheduler cache replaced");
            Ok(())
        }

        async fn lookup(&self, area_id: &AreaId) -> Result<Vec<SchedulerConfig>> {
            let mut conn = self.conn.clone();
            let raw: HashMap<String, String> = conn.hgetall(area_key(area_id)).await?;
            let mut configs = Vec::with_capacity(raw.len());
            for (id, value) in raw {
                match serde_json::from_str(&value) {
                    Ok(config) => configs.push(config),
                    Err(err) => warn!(scheduler = %id, error = %err, "skipping undecodable cached config"),
                }
            }
            Ok(configs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(area: &str, url: &str) -> SchedulerConfig {
        SchedulerConfig {
            area_id: AreaId::from(area),
            url: url.to_string(),
            access_token: "tok".into(),
        }
    }

    #[tokio::test]
    async fn replace_all_drops_vanished_areas() {
        let cache = InMemorySchedulerCache::new();
        let mut groups = AreaGroups::new();
        groups.insert(
            AreaId::from("eu"),
            vec![(SchedulerId::from("s1"), config("eu", "http://s1"))],
        );
        groups.insert(
            AreaId::from("us"),
            vec![(SchedulerId::from("s2"), config("us", "http://s2"))],
        );
        cache.replace_all(&groups).await.unwrap();
        assert_eq!(cache.lookup(&AreaId::from("us")).await.unwrap().len(), 1);

        groups.remove(&AreaId::from("us"));
        cache.replace_all(&groups).await.unwrap();
        assert!(cache.lookup(&AreaId::from("us")).await.unwrap().is_empty());
        assert_eq!(cache.areas(), vec![AreaId::from("eu")]);
    }
}
