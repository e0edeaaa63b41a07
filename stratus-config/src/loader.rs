use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use stratus_core::StatisticConfig;
use thiserror::Error;
use tracing::debug;

use crate::{
    models::{
        Config, ConfigMetadata, DEFAULT_MAX_CONNECTIONS, DEFAULT_SERVICE_TYPE, DatabaseConfig,
        EtcdConfig, LogConfig, RedisConfig,
    },
    sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["stratus.toml", "config/stratus.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Replaces the process environment entirely.
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.options.env = Some(vars);
        self
    }

    /// Resolve the configuration. Precedence, highest first: environment,
    /// `.env` file, TOML file, built-in defaults.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (dotenv, env_file_loaded) = self.read_env_file()?;
        let env = match &self.options.env {
            Some(vars) => EnvConfig::from_lookup(|key| {
                vars.get(key).or_else(|| dotenv.get(key)).cloned()
            })?,
            None => EnvConfig::from_lookup(|key| {
                std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
            })?,
        };

        let (file, config_path) = self.load_file_config(&env)?;
        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No stratus.toml detected; using environment variables and defaults",
                "Pass --config or set STRATUS_CONFIG to point at a configuration file",
            );
        }

        let config = compose(
            file.unwrap_or_default(),
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        );
        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok(ConfigLoad { config, warnings })
    }

    /// Entries of the `.env` file. A missing file is not an error.
    fn read_env_file(&self) -> Result<(HashMap<String, String>, bool), ConfigLoadError> {
        let iter = match &self.options.env_file {
            Some(path) => dotenvy::from_path_iter(path),
            // An injected environment is hermetic unless a file was named.
            None if self.options.env.is_some() => return Ok((HashMap::new(), false)),
            None => dotenvy::dotenv_iter(),
        };
        let iter = match iter {
            Ok(iter) => iter,
            Err(dotenvy::Error::Io(_)) => return Ok((HashMap::new(), false)),
            Err(err) => return Err(err.into()),
        };

        let mut vars = HashMap::new();
        for item in iter {
            let (key, value) = item?;
            vars.insert(key, value);
        }
        debug!(entries = vars.len(), "loaded .env file");
        Ok((vars, true))
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => return Err(ConfigLoadError::MissingConfig { path }),
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file = read_file_config(&path)?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose(file: FileConfig, env: EnvConfig, metadata: ConfigMetadata) -> Config {
    let FileConfig {
        service_type: file_service_type,
        database: file_database,
        redis: file_redis,
        etcd: file_etcd,
        statistic: file_statistic,
        log: file_log,
    } = file;

    let service_type = env
        .service_type
        .or(file_service_type)
        .unwrap_or_else(|| DEFAULT_SERVICE_TYPE.to_string());

    let database = DatabaseConfig {
        url: env
            .database_url
            .or(file_database.url)
            .filter(|url| !url.trim().is_empty()),
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS),
    };

    let redis = env
        .redis_url
        .map(|url| RedisConfig { url })
        .or_else(|| file_redis.map(|r| RedisConfig { url: r.url }));

    let etcd = EtcdConfig {
        endpoints: env
            .etcd_endpoints
            .or(file_etcd.endpoints)
            .unwrap_or_default(),
        username: env.etcd_username.or(file_etcd.username),
        password: env.etcd_password.or(file_etcd.password),
    };

    let mut statistic = file_statistic.unwrap_or_else(StatisticConfig::default);
    if let Some(enable) = env.statistic_enable {
        statistic.enable = enable;
    }
    if let Some(crontab) = env.crontab {
        statistic.crontab = crontab;
    }
    if let Some(ttl) = env.lock_ttl {
        statistic.lock_ttl_secs = ttl.as_secs();
    }
    if let Some(timeout) = env.rpc_timeout {
        statistic.rpc_timeout_secs = timeout.as_secs().max(1);
    }

    let log = LogConfig {
        format: env.log_format.or(file_log.format).unwrap_or_default(),
        filter: file_log.filter,
    };

    Config {
        service_type,
        database,
        redis,
        etcd,
        statistic,
        log,
        metadata,
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    InvalidEnv { key: &'static str, reason: String },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
