//! Nexlink store: the keyed resource cache and the coalescing delta queue
//! sitting between the reflector and the dispatcher.

#![forbid(unsafe_code)]

use std::sync::{Arc, PoisonError, RwLock};

use nexlink_core::{ChangeEvent, ResourceKey, ResourceRecord};
use rustc_hash::FxHashMap;
use tracing::trace;

mod queue;

pub use queue::DeltaQueue;

/// What a [`ResourceStore::set`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    /// Key was absent.
    Inserted,
    /// Key was present with an older version; carries the replaced record.
    Replaced(Arc<ResourceRecord>),
    /// Incoming version was not newer than the stored one; nothing changed.
    Stale,
}

/// Thread-safe cache holding at most one record per key.
///
/// Records are handed out as `Arc`s so readers never observe a partially
/// replaced value. The lock is only held for map operations and, in the
/// `*_enqueue` methods, for the matching queue push, so the queue order of a
/// key always agrees with the order its state changed in the store.
/// Lock order is store, then queue.
#[derive(Debug, Default)]
pub struct ResourceStore {
    items: RwLock<FxHashMap<ResourceKey, Arc<ResourceRecord>>>,
}

impl ResourceStore {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<ResourceRecord>> {
        self.read(|m| m.get(key).cloned())
    }

    /// Insert or replace, last-writer-wins by version.
    pub fn set(&self, record: Arc<ResourceRecord>) -> SetOutcome {
        self.write(|m| apply_set(m, record))
    }

    pub fn delete(&self, key: &ResourceKey) -> Option<Arc<ResourceRecord>> {
        self.write(|m| m.remove(key))
    }

    /// [`set`](Self::set) and enqueue the resulting `Added`/`Updated` in one step.
    pub fn set_enqueue(&self, record: Arc<ResourceRecord>, queue: &DeltaQueue) -> SetOutcome {
        self.write(|m| {
            let outcome = apply_set(m, record.clone());
            match &outcome {
                SetOutcome::Inserted => queue.push(ChangeEvent::Added(record)),
                SetOutcome::Replaced(old) => queue.push(ChangeEvent::Updated { old: old.clone(), new: record }),
                SetOutcome::Stale => {}
            }
            outcome
        })
    }

    /// Remove `key` and enqueue `Deleted` in one step.
    ///
    /// `last` is the final state reported by the source; a delete older than
    /// the stored version is ignored. Without `last` the stored record is reported.
    pub fn delete_enqueue(
        &self,
        key: &ResourceKey,
        last: Option<Arc<ResourceRecord>>,
        queue: &DeltaQueue,
    ) -> Option<Arc<ResourceRecord>> {
        self.write(|m| {
            let cur = m.get(key)?;
            if last.as_ref().is_some_and(|l| l.version < cur.version) {
                trace!(key = %key, stored = cur.version, "stale delete ignored");
                return None;
            }
            let removed = m.remove(key)?;
            queue.push(ChangeEvent::Deleted(last.unwrap_or_else(|| removed.clone())));
            Some(removed)
        })
    }

    /// Enqueue `Updated(r, r)` for every record while holding the read lock,
    /// so no writer can change or remove a record between snapshot and push.
    pub fn resync_enqueue(&self, queue: &DeltaQueue) -> usize {
        self.read(|m| {
            for r in m.values() {
                queue.push(ChangeEvent::Updated { old: r.clone(), new: r.clone() });
            }
            m.len()
        })
    }

    /// Snapshot of every record; the store may be mutated while the caller iterates.
    pub fn list(&self) -> Vec<Arc<ResourceRecord>> {
        self.read(|m| m.values().cloned().collect())
    }

    /// Snapshot of the records in one namespace, sorted by name.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<ResourceRecord>> {
        let mut out: Vec<_> = self.read(|m| m.values().filter(|r| r.key.namespace == namespace).cloned().collect());
        out.sort_by(|a, b| a.key.name.cmp(&b.key.name));
        out
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.read(|m| m.keys().cloned().collect())
    }

    pub fn len(&self) -> usize { self.read(|m| m.len()) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn read<T>(&self, f: impl FnOnce(&FxHashMap<ResourceKey, Arc<ResourceRecord>>) -> T) -> T {
        let guard = self.items.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut FxHashMap<ResourceKey, Arc<ResourceRecord>>) -> T) -> T {
        let mut guard = self.items.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

fn apply_set(m: &mut FxHashMap<ResourceKey, Arc<ResourceRecord>>, record: Arc<ResourceRecord>) -> SetOutcome {
    match m.get(&record.key) {
        Some(cur) if cur.version >= record.version => {
            trace!(key = %record.key, stored = cur.version, incoming = record.version, "stale set ignored");
            SetOutcome::Stale
        }
        _ => match m.insert(record.key.clone(), record) {
            Some(old) => SetOutcome::Replaced(old),
            None => SetOutcome::Inserted,
        },
    }
}
