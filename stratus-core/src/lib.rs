//! # Stratus Core
//!
//! Statistics aggregation pipeline for a storage network made of many
//! independent schedulers, one per geographic area.
//!
//! ## Overview
//!
//! On every cron tick one replica (whichever obtains the distributed lock)
//! pulls device, asset, event and system data from every live scheduler and
//! persists rollups:
//!
//! - **Scheduler discovery**: [`directory::SchedulerDirectory`] follows the
//!   coordination service and keeps a copy-on-write snapshot of endpoints
//! - **Fetchers**: [`fetcher::Fetcher`] implementations paginate one data
//!   category and turn pages into persistence jobs
//! - **Job queues**: one bounded [`queue::JobQueue`] and one worker per
//!   fetcher, with finalize detection once a cycle drains
//! - **Orchestration**: [`statistic::Statistic`] ties the schedule, lock and
//!   fan-out together
//!
//! ## Feature Flags
//!
//! - `postgres`: [`store::PostgresStatsStore`] and embedded migrations
//! - `redis`: Redis-backed lock and scheduler config cache
//! - `etcd`: etcd-backed coordination service
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratus_core::{
//!     config::StatisticConfig,
//!     directory::{InMemorySchedulerCache, SchedulerDirectory},
//!     fetcher::FetcherRegistry,
//!     lock::InMemoryLocker,
//!     registry::InMemoryServiceRegistry,
//!     rpc::JsonRpcConnector,
//!     statistic::Statistic,
//!     store::InMemoryStatsStore,
//! };
//!
//! async fn one_tick() -> stratus_core::Result<()> {
//!     let config = StatisticConfig::default();
//!     let directory = Arc::new(SchedulerDirectory::new(
//!         "scheduler",
//!         Arc::new(InMemoryServiceRegistry::new()),
//!         Arc::new(JsonRpcConnector::new(config.rpc_timeout())?),
//!         Arc::new(InMemorySchedulerCache::new()),
//!     ));
//!     directory.load_all().await?;
//!
//!     let statistic = Statistic::builder()
//!         .config(config)
//!         .directory(directory)
//!         .locker(Arc::new(InMemoryLocker::new()))
//!         .store(Arc::new(InMemoryStatsStore::new()))
//!         .fetchers(FetcherRegistry::with_defaults())
//!         .build()?;
//!     statistic.start_workers()?;
//!     statistic.run_once().await?;
//!     statistic.flush().await?;
//!     statistic.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod config;
pub mod directory;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod queue;
pub mod registry;
pub mod rpc;
pub mod statistic;
pub mod store;

#[cfg(feature = "postgres")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use config::{FinalizeConfig, FinalizeMode, StatisticConfig};
pub use error::{Result, StatsError};
pub use statistic::{Statistic, StatisticBuilder, TickOutcome};
