use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use metrics::{counter, gauge};
use nexlink_core::{ChangeEvent, ResourceKey};
use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

enum Slot {
    Key(ResourceKey),
    Synced,
}

#[derive(Default)]
struct Inner {
    /// Dispatch order; a key appears at most once.
    order: VecDeque<Slot>,
    /// Per-key pending events. At most a `Deleted` followed by one merged event.
    pending: FxHashMap<ResourceKey, VecDeque<ChangeEvent>>,
    coalesced: u64,
}

/// Coalescing queue keyed by resource with FIFO order across keys.
///
/// Multi-producer, single-consumer. Events for a key that is already queued
/// are merged into the pending entry instead of appended, so a hot key costs
/// one slot no matter how often it changes.
pub struct DeltaQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for DeltaQueue {
    fn default() -> Self { Self::new() }
}

impl DeltaQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()), notify: Notify::new() }
    }

    pub fn push(&self, ev: ChangeEvent) {
        let len = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let inner = &mut *guard;
            match ev.key().cloned() {
                None => inner.order.push_back(Slot::Synced),
                Some(key) => match inner.pending.get_mut(&key) {
                    None => {
                        inner.pending.insert(key.clone(), VecDeque::from([ev]));
                        inner.order.push_back(Slot::Key(key));
                    }
                    Some(chain) => {
                        let before = chain.len();
                        merge(chain, ev);
                        if chain.len() <= before {
                            inner.coalesced += 1;
                            counter!("nexlink_queue_coalesced_total", 1);
                            trace!(key = %key, "coalesced pending event");
                        }
                        if chain.is_empty() {
                            inner.pending.remove(&key);
                            inner.order.retain(|s| !matches!(s, Slot::Key(k) if *k == key));
                        }
                    }
                },
            }
            inner.order.len()
        };
        gauge!("nexlink_queue_len", len as f64);
        self.notify.notify_one();
    }

    /// Take the next event without waiting.
    pub fn try_pop(&self) -> Option<ChangeEvent> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = &mut *guard;
        while let Some(slot) = inner.order.pop_front() {
            let key = match slot {
                Slot::Synced => return Some(ChangeEvent::Synced),
                Slot::Key(key) => key,
            };
            let Some(chain) = inner.pending.get_mut(&key) else { continue };
            let ev = chain.pop_front();
            if chain.is_empty() {
                inner.pending.remove(&key);
            } else {
                // Remaining events for this key go before anything queued later.
                inner.order.push_front(Slot::Key(key));
            }
            if ev.is_some() {
                gauge!("nexlink_queue_len", inner.order.len() as f64);
                return ev;
            }
        }
        None
    }

    /// Wait for the next event. Returns `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<ChangeEvent> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let notified = self.notify.notified();
            if let Some(ev) = self.try_pop() {
                return Some(ev);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    /// Number of queued slots (distinct keys plus sync markers).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).order.len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Events merged into an already pending entry since creation.
    pub fn coalesced(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).coalesced
    }
}

/// Fold `ev` into the pending chain of the same key.
fn merge(chain: &mut VecDeque<ChangeEvent>, ev: ChangeEvent) {
    match ev {
        ChangeEvent::Deleted(last) => {
            // Delete supersedes whatever is pending after the last delete. If that
            // includes an add the handler never saw, the key never existed for it.
            let mut unseen_add = false;
            while chain.back().is_some_and(|e| !matches!(e, ChangeEvent::Deleted(_))) {
                if let Some(ChangeEvent::Added(_)) = chain.pop_back() {
                    unseen_add = true;
                }
            }
            if !unseen_add {
                chain.push_back(ChangeEvent::Deleted(last));
            }
        }
        ChangeEvent::Updated { old, new } => match chain.pop_back() {
            Some(ChangeEvent::Added(_)) => chain.push_back(ChangeEvent::Added(new)),
            Some(ChangeEvent::Updated { old: first, .. }) => chain.push_back(ChangeEvent::Updated { old: first, new }),
            Some(prev) => {
                chain.push_back(prev);
                chain.push_back(ChangeEvent::Updated { old, new });
            }
            None => chain.push_back(ChangeEvent::Updated { old, new }),
        },
        ChangeEvent::Added(new) => match chain.pop_back() {
            Some(ChangeEvent::Added(_)) => chain.push_back(ChangeEvent::Added(new)),
            Some(ChangeEvent::Updated { old: first, .. }) => chain.push_back(ChangeEvent::Updated { old: first, new }),
            Some(prev) => {
                chain.push_back(prev);
                chain.push_back(ChangeEvent::Added(new));
            }
            None => chain.push_back(ChangeEvent::Added(new)),
        },
        ChangeEvent::Synced => {}
    }
}
