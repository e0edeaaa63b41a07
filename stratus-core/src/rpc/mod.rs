//! Typed access to a scheduler's RPC surface.

mod jsonrpc;

pub use jsonrpc::*;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use stratus_model::{
    AssetRecord, NodeInfo, Page, ReplicaEvent, RetrievalEvent, SchedulerConfig, SystemInfo,
    ValidationResult,
};

use crate::{
    error::Result,
    fetcher::pagination::{PageRequest, RangeRequest},
};

/// Calls a fetcher can make against one scheduler.
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    async fn list_nodes(&self, page: PageRequest) -> Result<Page<NodeInfo>>;

    async fn list_assets(&self, range: RangeRequest) -> Result<Page<AssetRecord>>;

    async fn list_replica_events(&self, range: RangeRequest) -> Result<Page<ReplicaEvent>>;

    async fn list_validation_results(
        &self,
        range: RangeRequest,
    ) -> Result<Page<ValidationResult>>;

    async fn list_retrieval_events(&self, range: RangeRequest) -> Result<Page<RetrievalEvent>>;

    async fn system_info(&self) -> Result<SystemInfo>;
}

/// Builds an API client for a scheduler registration.
pub trait SchedulerConnector: Send + Sync {
    fn connect(&self, config: &SchedulerConfig) -> Result<Arc<dyn SchedulerApi>>;
}

/// Connector producing [`JsonRpcSchedulerClient`]s that share one HTTP pool.
#[derive(Debug, Clone)]
pub struct JsonRpcConnector {
    http: reqwest::Client,
    timeout: Duration,
}

impl JsonRpcConnector {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { http, timeout })
    }
}

impl SchedulerConnector for JsonRpcConnector {
    fn connect(&self, config: &SchedulerConfig) -> Result<Arc<dyn SchedulerApi>> {
        let client = JsonRpcSchedulerClient::with_http(
            self.http.clone(),
            &config.url,
            config.access_token.clone(),
            self.timeout,
        )?;
        Ok(Arc::new(client))
    }
}
