use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use stratus_model::{
    AssetRecord, NodeInfo, Page, ReplicaEvent, RetrievalEvent, SystemInfo, ValidationResult,
};
use tracing::{instrument, trace};
use url::Url;

use super::SchedulerApi;
use crate::{
    error::{Result, StatsError},
    fetcher::pagination::{PageRequest, RangeRequest},
};

pub const LIST_NODES: &str = "scheduler.ListNodes";
pub const LIST_ASSETS: &str = "scheduler.ListAssets";
pub const LIST_REPLICA_EVENTS: &str = "scheduler.ListReplicaEvents";
pub const LIST_VALIDATION_RESULTS: &str = "scheduler.ListValidationResults";
pub const LIST_RETRIEVAL_EVENTS: &str = "scheduler.ListRetrievalEvents";
pub const GET_SYSTEM_INFO: &str = "scheduler.GetSystemInfo";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Unwraps a JSON-RPC 2.0 response body into its result.
pub(crate) fn decode_response<T: DeserializeOwned>(method: &str, body: &[u8]) -> Result<T> {
    let response: RpcResponse<T> = serde_json::from_slice(body)?;
    if let Some(err) = response.error {
        return Err(StatsError::rpc(
            method,
            format!("{} (code {})", err.message, err.code),
        ));
    }
    response
        .result
        .ok_or_else(|| StatsError::rpc(method, "response carried neither result nor error"))
}

fn range_params(range: RangeRequest) -> Value {
    json!([{
        "Start": range.start,
        "End": range.end,
        "Cursor": range.cursor,
        "Count": range.count,
    }])
}

/// JSON-RPC 2.0 client for one scheduler endpoint.
pub struct JsonRpcSchedulerClient {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl fmt::Debug for JsonRpcSchedulerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcSchedulerClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl JsonRpcSchedulerClient {
    pub fn new(endpoint: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_http(http, endpoint, token, timeout)
    }

    pub fn with_http(
        http: reqwest::Client,
        endpoint: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            StatsError::InvalidConfig(format!("scheduler url {endpoint:?}: {e}"))
        })?;
        Ok(Self {
            http,
            endpoint,
            token: token.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        trace!(method, %status, bytes = body.len(), "rpc response");

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(StatsError::rpc(method, format!("HTTP {status}: {text}")));
        }
        decode_response(method, &body)
    }
}

#[async_trait]
impl SchedulerApi for JsonRpcSchedulerClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn list_nodes(&self, page: PageRequest) -> Result<Page<NodeInfo>> {
        self.call(LIST_NODES, json!([page.offset, page.limit])).await
    }

    async fn list_assets(&self, range: RangeRequest) -> Result<Page<AssetRecord>> {
        self.call(LIST_ASSETS, range_params(range)).await
    }

    async fn list_replica_events(&self, range: RangeRequest) -> Result<Page<ReplicaEvent>> {
        self.call(LIST_REPLICA_EVENTS, range_params(range)).await
    }

    async fn list_validation_results(
        &self,
        range: RangeRequest,
    ) -> Result<Page<ValidationResult>> {
        self.call(LIST_VALIDATION_RESULTS, range_params(range)).await
    }

    async fn list_retrieval_events(&self, range: RangeRequest) -> Result<Page<RetrievalEvent>> {
        self.call(LIST_RETRIEVAL_EVENTS, range_params(range)).await
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        self.call(GET_SYSTEM_INFO, json!([])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn decodes_paged_result() {
        let body = br#"{"jsonrpc":"2.0","id":1,"result":{"Data":[{"NodeID":"e_1","Status":"Online","LastSeen":"2024-05-01T10:00:00Z"}],"Total":42}}"#;
        let page: Page<NodeInfo> = decode_response(LIST_NODES, body).expect("decode");
        assert_eq!(page.total, 42);
        assert_eq!(page.data[0].node_id, "e_1");
        assert!(page.data[0].is_online());
    }

    #[test]
    fn surfaces_rpc_errors_with_method() {
        let body = br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#;
        let err = decode_response::<SystemInfo>(GET_SYSTEM_INFO, body).expect_err("error");
        match err {
            StatsError::Rpc { method, message } => {
                assert_eq!(method, GET_SYSTEM_INFO);
                assert!(message.contains("method not found"));
                assert!(message.contains("-32601"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn range_params_use_scheduler_field_names() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let params = range_params(RangeRequest {
            start,
            end: start + chrono::Duration::hours(1),
            cursor: 500,
            count: 500,
        });
        assert_eq!(params[0]["Cursor"], 500);
        assert_eq!(params[0]["Start"], "2024-05-01T00:00:00Z");
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let err = JsonRpcSchedulerClient::new("not a url", "tok", Duration::from_secs(1))
            .expect_err("invalid url");
        assert!(matches!(err, StatsError::InvalidConfig(_)));
    }
}
