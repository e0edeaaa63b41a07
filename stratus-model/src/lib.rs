//! Data model shared between the statistics pipeline and its host process.
//!
//! Records in this crate mirror what a scheduler returns over RPC. Field names
//! are serialized in PascalCase because that is how schedulers encode them.
#![allow(missing_docs)]

pub mod asset;
pub mod events;
pub mod ids;
pub mod node;
pub mod page;
pub mod scheduler;
pub mod system;

pub use asset::AssetRecord;
pub use events::{
    EventKind, ReplicaEvent, ReplicaStatus, RetrievalEvent, ValidationResult,
    ValidationStatus,
};
pub use ids::{AreaId, SchedulerId};
pub use node::{NodeInfo, NodeStatus};
pub use page::Page;
pub use scheduler::SchedulerConfig;
pub use system::SystemInfo;
