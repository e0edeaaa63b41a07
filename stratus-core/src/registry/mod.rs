//! Coordination service access.
//!
//! Schedulers register themselves under `/{service_type}/{scheduler_id}` with
//! a JSON [`stratus_model::SchedulerConfig`] value. The directory lists that
//! namespace at boot and then follows it through a watch stream.

#[cfg(feature = "etcd")]
mod etcd;
mod memory;

#[cfg(feature = "etcd")]
pub use etcd::*;
pub use memory::*;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// One key under a service namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
    /// Events were missed; consumers should re-list the namespace.
    Resync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    /// Empty for deletes and resyncs.
    pub value: Vec<u8>,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Every registration currently stored under `service_type`.
    async fn list(&self, service_type: &str) -> Result<Vec<Registration>>;

    /// Changes under `service_type` from now on. The stream ends when the
    /// underlying watch is closed.
    async fn watch(&self, service_type: &str) -> Result<WatchStream>;
}

pub fn service_prefix(service_type: &str) -> String {
    format!("/{}/", service_type.trim_matches('/'))
}

/// The id part of a registration key, i.e. whatever follows the prefix.
pub fn registration_id<'a>(service_type: &str, key: &'a str) -> &'a str {
    let prefix = service_prefix(service_type);
    key.strip_prefix(prefix.as_str()).unwrap_or(key)
}
