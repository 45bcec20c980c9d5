//! Collaborator seams: where records come from and where change notifications go.

use futures::stream::BoxStream;

use crate::{ChangeKind, ResourceKey, ResourceRecord, SourceError};

/// Result of a full list: every record plus the collection version to watch from.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub items: Vec<ResourceRecord>,
    pub version: u64,
    /// Objects the source saw but could not decode. They still exist remotely,
    /// so their cached state must not be treated as deleted.
    pub skipped: Vec<ResourceKey>,
}

/// One notification from a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Changed(ChangeKind, ResourceRecord),
    /// Progress marker: the source has delivered everything up to this version.
    Bookmark(u64),
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent, SourceError>>;

/// Remote API the reflector synchronizes from.
///
/// A watch stream that simply ends is a normal close; it is not an error.
#[async_trait::async_trait]
pub trait ResourceSource: Send + Sync {
    async fn list(&self) -> Result<Listing, SourceError>;

    async fn watch(&self, from_version: u64) -> Result<WatchStream, SourceError>;
}

/// Application logic reacting to changes.
///
/// Callbacks run on the dispatcher task one at a time, so they should return
/// quickly: a slow handler delays every event queued behind it. Errors are
/// logged and counted, never retried.
pub trait ChangeHandler: Send + Sync {
    fn on_add(&self, record: &ResourceRecord) -> anyhow::Result<()>;

    fn on_update(&self, old: &ResourceRecord, new: &ResourceRecord) -> anyhow::Result<()>;

    fn on_delete(&self, last: &ResourceRecord) -> anyhow::Result<()>;
}
