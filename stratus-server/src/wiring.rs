//! Builds the pipeline's collaborators from a loaded [`Config`].

use std::{fmt, sync::Arc};

use anyhow::Context;
use redis::aio::ConnectionManager;
use stratus_config::Config;
use stratus_core::{
    Statistic,
    directory::{
        InMemorySchedulerCache, RedisSchedulerCache, SchedulerConfigCache, SchedulerDirectory,
    },
    fetcher::FetcherRegistry,
    lock::{InMemoryLocker, Locker, RedisLocker},
    registry::{EtcdServiceRegistry, ServiceRegistry},
    rpc::{JsonRpcConnector, SchedulerConnector},
    store::{InMemoryStatsStore, PostgresStatsStore, StatsStore},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// External systems the pipeline talks to.
#[derive(Clone)]
pub struct Backends {
    pub registry: Arc<dyn ServiceRegistry>,
    pub locker: Arc<dyn Locker>,
    pub cache: Arc<dyn SchedulerConfigCache>,
    pub store: Arc<dyn StatsStore>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("locker", &self.locker)
            .field("cache", &self.cache)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Backends {
    /// Connect everything the configuration names. Without Redis the lock
    /// and topology cache are process-local; without a database URL the
    /// store is in memory.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let registry = connect_registry(config).await?;

        let (locker, cache): (Arc<dyn Locker>, Arc<dyn SchedulerConfigCache>) =
            match &config.redis {
                Some(redis_config) => {
                    let client = redis::Client::open(redis_config.url.as_str())
                        .context("invalid Redis URL")?;
                    let conn = ConnectionManager::new(client)
                        .await
                        .context("failed to connect to Redis")?;
                    info!("connected to Redis");
                    (
                        Arc::new(RedisLocker::new(conn.clone())),
                        Arc::new(RedisSchedulerCache::new(conn)),
                    )
                }
                None => {
                    warn!("Redis not configured; using process-local lock and cache");
                    (
                        Arc::new(InMemoryLocker::new()),
                        Arc::new(InMemorySchedulerCache::new()),
                    )
                }
            };

        let store: Arc<dyn StatsStore> = match &config.database.url {
            Some(url) => {
                let store = PostgresStatsStore::connect(url, config.database.max_connections)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                store
                    .migrate()
                    .await
                    .context("failed to apply database migrations")?;
                Arc::new(store)
            }
            None => {
                warn!("database not configured; statistics are kept in memory");
                Arc::new(InMemoryStatsStore::new())
            }
        };

        Ok(Self {
            registry,
            locker,
            cache,
            store,
        })
    }
}

pub async fn connect_registry(config: &Config) -> anyhow::Result<Arc<dyn ServiceRegistry>> {
    let registry = EtcdServiceRegistry::connect(&config.etcd.endpoints, config.etcd.credentials())
        .await
        .context("failed to connect to the coordination service")?;
    Ok(Arc::new(registry))
}

pub fn connector(config: &Config) -> anyhow::Result<Arc<dyn SchedulerConnector>> {
    let connector = JsonRpcConnector::new(config.statistic.rpc_timeout())
        .context("failed to build scheduler RPC client")?;
    Ok(Arc::new(connector))
}

/// Build the directory and load the initial scheduler set. A failed
/// initial load is fatal.
pub async fn bootstrap_directory(
    config: &Config,
    registry: Arc<dyn ServiceRegistry>,
    connector: Arc<dyn SchedulerConnector>,
    cache: Arc<dyn SchedulerConfigCache>,
) -> anyhow::Result<Arc<SchedulerDirectory>> {
    let directory = Arc::new(SchedulerDirectory::new(
        config.service_type.clone(),
        registry,
        connector,
        cache,
    ));
    let schedulers = directory
        .load_all()
        .await
        .context("failed to load schedulers from the coordination service")?;
    if schedulers.is_empty() {
        warn!(service_type = %config.service_type, "no schedulers registered yet");
    }
    Ok(directory)
}

pub fn build_statistic(
    config: &Config,
    directory: Arc<SchedulerDirectory>,
    backends: &Backends,
    cancel: &CancellationToken,
) -> anyhow::Result<Arc<Statistic>> {
    let statistic = Statistic::builder()
        .config(config.statistic.clone())
        .directory(directory)
        .locker(Arc::clone(&backends.locker))
        .store(Arc::clone(&backends.store))
        .fetchers(FetcherRegistry::with_defaults())
        .cancellation(cancel.clone())
        .build()
        .context("failed to assemble statistics pipeline")?;
    Ok(Arc::new(statistic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_config::{ConfigLoader, LogFormat};
    use stratus_core::{registry::InMemoryServiceRegistry, statistic::TickState};

    fn config() -> Config {
        let vars = [("ETCD_ENDPOINTS", "http://127.0.0.1:2379")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigLoader::new()
            .with_env(vars)
            .load()
            .expect("config")
            .config
    }

    fn in_memory() -> Backends {
        Backends {
            registry: Arc::new(InMemoryServiceRegistry::new()),
            locker: Arc::new(InMemoryLocker::new()),
            cache: Arc::new(InMemorySchedulerCache::new()),
            store: Arc::new(InMemoryStatsStore::new()),
        }
    }

    #[tokio::test]
    async fn assembles_default_pipeline() {
        let config = config();
        assert_eq!(config.log.format, LogFormat::Pretty);
        let backends = in_memory();
        let directory = bootstrap_directory(
            &config,
            Arc::clone(&backends.registry),
            connector(&config).unwrap(),
            Arc::clone(&backends.cache),
        )
        .await
        .unwrap();
        assert!(directory.snapshot().is_empty());

        let cancel = CancellationToken::new();
        let statistic = build_statistic(&config, directory, &backends, &cancel).unwrap();
        assert_eq!(
            statistic.fetcher_names(),
            FetcherRegistry::with_defaults().names()
        );
        assert_eq!(statistic.state(), TickState::Idle);

        cancel.cancel();
        assert!(statistic.cancellation().is_cancelled());
    }
}
