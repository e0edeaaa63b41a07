use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, WatchOptions};
use futures::StreamExt;
use tracing::{debug, info};

use super::{
    Registration, ServiceRegistry, WatchEvent, WatchEventKind, WatchStream, service_prefix,
};
use crate::error::{Result, StatsError};

fn registry_error(err: etcd_client::Error) -> StatsError {
    StatsError::Registry(err.to_string())
}

/// Revision a watch must start from to see every change after a listing
/// taken at `listed`. `None` when nothing has been listed yet.
fn watch_start_revision(listed: i64) -> Option<i64> {
    (listed > 0).then_some(listed + 1)
}

/// [`ServiceRegistry`] backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdServiceRegistry {
    client: Client,
    endpoints: Vec<String>,
    /// Store revision of the newest listing.
    listed_revision: Arc<AtomicI64>,
}

impl fmt::Debug for EtcdServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdServiceRegistry")
            .field("endpoints", &self.endpoints)
            .field("listed_revision", &self.listed_revision.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EtcdServiceRegistry {
    pub async fn connect(
        endpoints: &[String],
        credentials: Option<(String, String)>,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(StatsError::InvalidConfig(
                "at least one etcd endpoint is required".into(),
            ));
        }

        let options = credentials.map(|(user, password)| ConnectOptions::new().with_user(user, password));
        let client = Client::connect(endpoints, options)
            .await
            .map_err(registry_error)?;
        info!(endpoints = ?endpoints, "connected to coordination service");

        Ok(Self {
            client,
            endpoints: endpoints.to_vec(),
            listed_revision: Arc::new(AtomicI64::new(0)),
        })
    }
}

#[async_trait]
impl ServiceRegistry for EtcdServiceRegistry {
    async fn list(&self, service_type: &str) -> Result<Vec<Registration>> {
        let prefix = service_prefix(service_type);
        let mut client = self.client.clone();
        let response = client
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(registry_error)?;
        if let Some(header) = response.header() {
            self.listed_revision
                .fetch_max(header.revision(), Ordering::SeqCst);
        }

        let mut registrations = Vec::with_capacity(response.kvs().len());
        for kv in response.kvs() {
            let key = kv.key_str().map_err(registry_error)?.to_string();
            registrations.push(Registration {
                key,
                value: kv.value().to_vec(),
            });
        }
        debug!(prefix = %prefix, count = registrations.len(), "listed registrations");
        Ok(registrations)
    }

    async fn watch(&self, service_type: &str) -> Result<WatchStream> {
        let prefix = service_prefix(service_type);
        let mut client = self.client.clone();
        let mut options = WatchOptions::new().with_prefix();
        // Pick up anything written between the last listing and now.
        if let Some(revision) = watch_start_revision(self.listed_revision.load(Ordering::SeqCst)) {
            options = options.with_start_revision(revision);
            debug!(prefix = %prefix, revision, "watch resumes after listing");
        }
        let (watcher, mut events) = client
            .watch(prefix.as_str(), Some(options))
            .await
            .map_err(registry_error)?;

        let stream = async_stream::stream! {
            // Dropping the watcher cancels the server-side watch.
            let _watcher = watcher;
            while let Some(message) = events.next().await {
                let response = match message {
                    Ok(response) => response,
                    Err(err) => {
                        yield Err(registry_error(err));
                        break;
                    }
                };
                if response.canceled() {
                    break;
                }
                for event in response.events() {
                    let Some(kv) = event.kv() else { continue };
                    let kind = match event.event_type() {
                        EventType::Put => WatchEventKind::Put,
                        EventType::Delete => WatchEventKind::Delete,
                    };
                    let key = match kv.key_str() {
                        Ok(key) => key.to_string(),
                        Err(err) => {
                            yield Err(registry_error(err));
                            continue;
                        }
                    };
                    yield Ok(WatchEvent {
                        kind,
                        key,
                        value: kv.value().to_vec(),
                    });
                }
            }
        };
        Ok(stream.boxed())
    }
}
