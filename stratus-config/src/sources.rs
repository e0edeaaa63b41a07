use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use stratus_core::StatisticConfig;

use crate::{loader::ConfigLoadError, models::LogFormat};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub etcd: FileEtcdConfig,
    pub statistic: Option<StatisticConfig>,
    #[serde(default)]
    pub log: FileLogConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileEtcdConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub service_type: Option<String>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub redis_url: Option<String>,
    pub etcd_endpoints: Option<Vec<String>>,
    pub etcd_username: Option<String>,
    pub etcd_password: Option<String>,
    pub statistic_enable: Option<bool>,
    pub crontab: Option<String>,
    pub lock_ttl: Option<Duration>,
    pub rpc_timeout: Option<Duration>,
    pub log_format: Option<LogFormat>,
}

impl EnvConfig {
    /// Read from the process environment.
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigLoadError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            config_path: var("STRATUS_CONFIG").map(PathBuf::from),
            service_type: var("STRATUS_SERVICE_TYPE"),
            database_url: var("DATABASE_URL"),
            database_max_connections: parse_with(&var, "DATABASE_MAX_CONNECTIONS", |raw| {
                raw.parse::<u32>().map_err(|e| e.to_string())
            })?,
            redis_url: var("REDIS_URL"),
            etcd_endpoints: var("ETCD_ENDPOINTS").map(|raw| split_list(&raw)),
            etcd_username: var("ETCD_USERNAME"),
            etcd_password: var("ETCD_PASSWORD"),
            statistic_enable: parse_with(&var, "STRATUS_STATISTIC_ENABLE", parse_bool)?,
            crontab: var("STRATUS_CRONTAB"),
            lock_ttl: parse_with(&var, "STRATUS_LOCK_TTL", parse_duration)?,
            rpc_timeout: parse_with(&var, "STRATUS_RPC_TIMEOUT", parse_duration)?,
            log_format: parse_with(&var, "STRATUS_LOG_FORMAT", |raw| {
                match raw.to_ascii_lowercase().as_str() {
                    "json" => Ok(LogFormat::Json),
                    "pretty" | "text" => Ok(LogFormat::Pretty),
                    other => Err(format!("unknown log format `{other}`")),
                }
            })?,
        })
    }
}

fn parse_with<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<Option<T>, ConfigLoadError> {
    var(key)
        .map(|raw| {
            parse(raw.trim()).map_err(|reason| ConfigLoadError::InvalidEnv { key, reason })
        })
        .transpose()
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got `{other}`")),
    }
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
