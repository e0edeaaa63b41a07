use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use stratus_core::StatisticConfig;

pub const DEFAULT_SERVICE_TYPE: &str = "scheduler";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Fully resolved configuration for the statistics service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordination-service namespace schedulers register under.
    pub service_type: String,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub etcd: EtcdConfig,
    pub statistic: StatisticConfig,
    pub log: LogConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Clone, Default)]
pub struct DatabaseConfig {
    /// `None` runs the pipeline against the in-process store.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Clone, Default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl EtcdConfig {
    /// Username and password, when both are set.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        }
    }
}

impl fmt::Debug for EtcdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdConfig")
            .field("endpoints", &self.endpoints)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
