use thiserror::Error;
use url::Url;

use crate::models::Config;

/// Shortest lock TTL accepted. Anything lower risks the lease expiring
/// between renewals on a slow tick.
pub const MIN_LOCK_TTL_SECS: u64 = 10;

/// Largest page requested from a scheduler. Keeps one page of device rows
/// under the database's per-statement bind limit.
pub const MAX_PAGE_SIZE: i64 = 4000;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("invalid cron expression for {field}: {reason}")]
    InvalidCron { field: &'static str, reason: String },
    #[error("statistic.page_size must be positive")]
    ZeroPageSize,
    #[error("statistic.page_size must be at most {max}, got {0}", max = MAX_PAGE_SIZE)]
    PageSizeTooLarge(i64),
    #[error("statistic.queue_capacity must be positive")]
    ZeroQueueCapacity,
    #[error("statistic.lock_ttl_secs must be at least {min} seconds, got {0}", min = MIN_LOCK_TTL_SECS)]
    LockTtlTooShort(u64),
    #[error("at least one etcd endpoint is required (set ETCD_ENDPOINTS or etcd.endpoints)")]
    MissingEtcdEndpoints,
    #[error("invalid {field} URL: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("service_type must not be empty or contain '/'")]
    InvalidServiceType,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let statistic = &config.statistic;

    if config.service_type.trim().is_empty() || config.service_type.contains('/') {
        return Err(ConfigGuardRailError::InvalidServiceType);
    }

    for (field, expr) in [
        ("statistic.crontab", &statistic.crontab),
        ("statistic.maintenance_crontab", &statistic.maintenance_crontab),
    ] {
        stratus_core::statistic::parse_schedule(expr).map_err(|err| {
            ConfigGuardRailError::InvalidCron {
                field,
                reason: err.to_string(),
            }
        })?;
    }

    if statistic.page_size <= 0 {
        return Err(ConfigGuardRailError::ZeroPageSize);
    }
    if statistic.page_size > MAX_PAGE_SIZE {
        return Err(ConfigGuardRailError::PageSizeTooLarge(statistic.page_size));
    }
    if statistic.queue_capacity == 0 {
        return Err(ConfigGuardRailError::ZeroQueueCapacity);
    }
    if statistic.lock_ttl_secs < MIN_LOCK_TTL_SECS {
        return Err(ConfigGuardRailError::LockTtlTooShort(statistic.lock_ttl_secs));
    }
    if config.etcd.endpoints.is_empty() {
        return Err(ConfigGuardRailError::MissingEtcdEndpoints);
    }

    if let Some(url) = &config.database.url {
        check_url("database", url)?;
    } else {
        warnings.push_with_hint(
            "DATABASE_URL not configured; statistics are kept in memory and lost on exit",
            "Set DATABASE_URL or database.url to persist rollups in Postgres",
        );
    }

    match &config.redis {
        Some(redis) => check_url("redis", &redis.url)?,
        None => warnings.push_with_hint(
            "REDIS_URL not configured; the tick lock is process-local",
            "Run a single replica or set REDIS_URL so replicas share one lock",
        ),
    }

    if !statistic.renew_lock {
        warnings.push(
            "statistic.renew_lock is false; ticks longer than the lock TTL may overlap across replicas",
        );
    }

    if !statistic.enable {
        warnings.push("statistic.enable is false; the service will idle");
    }

    Ok(warnings)
}

fn check_url(field: &'static str, raw: &str) -> Result<(), ConfigGuardRailError> {
    Url::parse(raw)
        .map(|_| ())
        .map_err(|err| ConfigGuardRailError::InvalidUrl {
            field,
            reason: err.to_string(),
        })
}
