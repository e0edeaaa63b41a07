//! Configuration loading for the statistics service.
//!
//! A [`ConfigLoader`] merges a TOML file, an optional `.env` file and the
//! process environment into a typed [`Config`], then applies guard rails that
//! reject settings the pipeline cannot run with.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, EtcdConfig, LogConfig, LogFormat, RedisConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings, MAX_PAGE_SIZE};
