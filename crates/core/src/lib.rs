//! Nexlink core types: resource keys, records, change events and the
//! collaborator traits the sync engine is written against.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod error;
mod source;

pub use error::{ConfigError, SourceError};
pub use source::{ChangeHandler, Listing, ResourceSource, WatchEvent, WatchStream};

/// Stable identity of a resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Immutable snapshot of one resource at a given version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub key: ResourceKey,
    /// Monotonic per-source sequence number.
    pub version: u64,
    /// Observed state, opaque to the engine.
    pub raw: serde_json::Value,
}

impl ResourceRecord {
    pub fn new(key: ResourceKey, version: u64, raw: serde_json::Value) -> Self {
        Self { key, version, raw }
    }
}

/// Kind of change carried by a watch notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// Logical change produced by the reflector or the resync timer and consumed
/// once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(Arc<ResourceRecord>),
    Updated { old: Arc<ResourceRecord>, new: Arc<ResourceRecord> },
    Deleted(Arc<ResourceRecord>),
    /// Every event of the initial list precedes this marker.
    Synced,
}

impl ChangeEvent {
    /// Key of the resource this event concerns; `None` for [`ChangeEvent::Synced`].
    pub fn key(&self) -> Option<&ResourceKey> {
        match self {
            ChangeEvent::Added(r) | ChangeEvent::Deleted(r) => Some(&r.key),
            ChangeEvent::Updated { new, .. } => Some(&new.key),
            ChangeEvent::Synced => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChangeEvent::Added(_) => "added",
            ChangeEvent::Updated { .. } => "updated",
            ChangeEvent::Deleted(_) => "deleted",
            ChangeEvent::Synced => "synced",
        }
    }
}

pub mod prelude {
    pub use super::{
        ChangeEvent, ChangeHandler, ChangeKind, Listing, ResourceKey, ResourceRecord, ResourceSource,
        SourceError, WatchEvent, WatchStream,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_renders_namespace_slash_name() {
        assert_eq!(ResourceKey::new("default", "svc-a").to_string(), "default/svc-a");
    }

    #[test]
    fn synced_has_no_key() {
        assert!(ChangeEvent::Synced.key().is_none());
        let r = Arc::new(ResourceRecord::new(ResourceKey::new("ns", "a"), 1, serde_json::Value::Null));
        let ev = ChangeEvent::Updated { old: r.clone(), new: r };
        assert_eq!(ev.key(), Some(&ResourceKey::new("ns", "a")));
        assert_eq!(ev.label(), "updated");
    }
}
