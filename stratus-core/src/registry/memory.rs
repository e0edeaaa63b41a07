use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use super::{
    Registration, ServiceRegistry, WatchEvent, WatchEventKind, WatchStream, service_prefix,
};
use crate::error::{Result, StatsError};

/// Process-local coordination service.
///
/// Writes are visible to `list` immediately and fan out to every open watch.
/// [`InMemoryServiceRegistry::close_watches`] ends all open streams, which is
/// how a lost connection looks to the directory.
#[derive(Debug)]
pub struct InMemoryServiceRegistry {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    events: Mutex<Option<broadcast::Sender<WatchEvent>>>,
}

const DEFAULT_WATCH_BUFFER: usize = 256;

impl Default for InMemoryServiceRegistry {
    fn default() -> Self {
        Self::with_watch_buffer(DEFAULT_WATCH_BUFFER)
    }
}

impl InMemoryServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose watches buffer at most `events` undelivered changes.
    /// A watcher that falls further behind gets a resync event.
    pub fn with_watch_buffer(events: usize) -> Self {
        let (tx, _) = broadcast::channel(events.max(1));
        Self {
            entries: Mutex::new(BTreeMap::new()),
            events: Mutex::new(Some(tx)),
        }
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        self.entries.lock().insert(key.clone(), value.clone());
        self.publish(WatchEvent {
            kind: WatchEventKind::Put,
            key,
            value,
        });
    }

    pub fn delete(&self, key: &str) {
        if self.entries.lock().remove(key).is_some() {
            self.publish(WatchEvent {
                kind: WatchEventKind::Delete,
                key: key.to_string(),
                value: Vec::new(),
            });
        }
    }

    pub fn close_watches(&self) {
        self.events.lock().take();
    }

    fn publish(&self, event: WatchEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            // No receivers is fine.
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryServiceRegistry {
    async fn list(&self, service_type: &str) -> Result<Vec<Registration>> {
        let prefix = service_prefix(service_type);
        Ok(self
            .entries
            .lock()
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, value)| Registration {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn watch(&self, service_type: &str) -> Result<WatchStream> {
        let receiver = self
            .events
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| StatsError::Registry("registry is closed".into()))?;

        let prefix = service_prefix(service_type);
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let prefix = prefix.clone();
            async move {
                match item {
                    Ok(event) if event.key.starts_with(&prefix) => Some(Ok(event)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(missed, "registry watch lagged; requesting resync");
                        Some(Ok(WatchEvent {
                            kind: WatchEventKind::Resync,
                            key: prefix,
                            value: Vec::new(),
                        }))
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_scoped_to_the_service_prefix() {
        let registry = InMemoryServiceRegistry::new();
        registry.put("/scheduler/a", b"1".to_vec());
        registry.put("/scheduler/b", b"2".to_vec());
        registry.put("/schedulerx/c", b"3".to_vec());
        registry.put("/other/d", b"4".to_vec());

        let keys: Vec<_> = registry
            .list("scheduler")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["/scheduler/a", "/scheduler/b"]);
    }

    #[tokio::test]
    async fn watch_sees_puts_and_deletes_then_ends_on_close() {
        let registry = InMemoryServiceRegistry::new();
        let mut stream = registry.watch("scheduler").await.unwrap();

        registry.put("/other/x", b"ignored".to_vec());
        registry.put("/scheduler/a", b"1".to_vec());
        registry.delete("/scheduler/a");
        registry.close_watches();

        let put = stream.next().await.unwrap().unwrap();
        assert_eq!(put.kind, WatchEventKind::Put);
        assert_eq!(put.key, "/scheduler/a");
        let delete = stream.next().await.unwrap().unwrap();
        assert_eq!(delete.kind, WatchEventKind::Delete);
        assert!(stream.next().await.is_none());
        assert!(registry.watch("scheduler").await.is_err());
    }

    #[tokio::test]
    async fn lagging_watch_resyncs_instead_of_ending() {
        let registry = InMemoryServiceRegistry::with_watch_buffer(2);
        let mut stream = registry.watch("scheduler").await.unwrap();

        for i in 0..5 {
            registry.put(format!("/scheduler/s{i}"), b"{}".to_vec());
        }

        let resync = stream.next().await.unwrap().unwrap();
        assert_eq!(resync.kind, WatchEventKind::Resync);
        assert_eq!(resync.key, "/scheduler/");

        // The newest buffered changes still arrive afterwards.
        let keys = [
            stream.next().await.unwrap().unwrap().key,
            stream.next().await.unwrap().unwrap().key,
        ];
        assert_eq!(keys, ["/scheduler/s3", "/scheduler/s4"]);

        registry.put("/scheduler/s5", b"{}".to_vec());
        assert_eq!(stream.next().await.unwrap().unwrap().key, "/scheduler/s5");
        registry.close_watches();
        assert!(stream.next().await.is_none());
    }
}
