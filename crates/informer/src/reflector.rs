//! List-then-watch synchronization against a [`ResourceSource`].
//!
//! The reflector is an explicit state machine:
//!
//! ```text
//!   Listing ──ok──▶ Watching{from} ──Stale/Closed/Error──▶ BackingOff{delay} ──▶ Listing
//!      └──err──────────────────────────────────────────────▲
//! ```
//!
//! Every state races the cancellation token, so a stop request is observed at
//! the next poll of whatever the reflector is waiting on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use metrics::counter;
use nexlink_core::{ChangeEvent, ChangeKind, Listing, ResourceKey, ResourceRecord, ResourceSource, SourceError, WatchEvent};
use nexlink_store::{DeltaQueue, ResourceStore, SetOutcome};
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::BackoffConfig;
use crate::health::{HealthCell, SourcePhase};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Listing,
    Watching { from: u64 },
    BackingOff { delay: Duration },
}

/// How a watch session ended.
#[derive(Debug)]
enum WatchOutcome {
    Stale,
    Closed,
    Error(SourceError),
    StopRequested,
}

#[derive(Debug, Default)]
struct ListStats {
    added: usize,
    updated: usize,
    deleted: usize,
}

pub struct Reflector {
    source: Arc<dyn ResourceSource>,
    store: Arc<ResourceStore>,
    queue: Arc<DeltaQueue>,
    health: Arc<HealthCell>,
    backoff: Backoff,
    synced_sent: bool,
}

impl Reflector {
    pub(crate) fn new(
        source: Arc<dyn ResourceSource>,
        store: Arc<ResourceStore>,
        queue: Arc<DeltaQueue>,
        health: Arc<HealthCell>,
        backoff: BackoffConfig,
    ) -> Self {
        Self { source, store, queue, health, backoff: Backoff::new(backoff), synced_sent: false }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut phase = Phase::Listing;
        loop {
            let next = match phase {
                Phase::Listing => self.list(&cancel).await,
                Phase::Watching { from } => self.watch(from, &cancel).await,
                Phase::BackingOff { delay } => self.back_off(delay, &cancel).await,
            };
            match next {
                Some(p) => phase = p,
                None => break,
            }
        }
        self.health.update(|h| h.phase = SourcePhase::Stopped);
        info!("reflector stopped");
    }

    async fn list(&mut self, cancel: &CancellationToken) -> Option<Phase> {
        self.health.update(|h| h.phase = SourcePhase::Listing);
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            res = self.source.list() => res,
        };
        counter!("nexlink_reflector_lists_total", 1);
        match res {
            Ok(listing) => {
                let version = listing.version;
                let items = listing.items.len();
                let stats = self.replace(listing);
                info!(items, added = stats.added, updated = stats.updated, deleted = stats.deleted, version, "list applied");
                if !self.synced_sent {
                    self.queue.push(ChangeEvent::Synced);
                    self.synced_sent = true;
                }
                self.health.update(|h| {
                    h.consecutive_failures = 0;
                    h.last_error = None;
                    h.last_list_at = Some(Utc::now());
                    h.version = version;
                });
                Some(Phase::Watching { from: version })
            }
            Err(e) => {
                warn!(error = %e, "list failed");
                Some(self.fail(&e))
            }
        }
    }

    async fn watch(&mut self, from: u64, cancel: &CancellationToken) -> Option<Phase> {
        self.health.update(|h| h.phase = SourcePhase::Watching);
        let (outcome, progressed) = self.watch_session(from, cancel).await;
        if progressed {
            self.backoff.reset();
        }
        match outcome {
            WatchOutcome::StopRequested => None,
            WatchOutcome::Stale => {
                counter!("nexlink_reflector_watch_restarts_total", 1, "reason" => "stale");
                info!(from, "resource version too old; relisting");
                Some(Phase::BackingOff { delay: self.backoff.next_delay() })
            }
            WatchOutcome::Closed => {
                counter!("nexlink_reflector_watch_restarts_total", 1, "reason" => "closed");
                debug!(from, "watch closed by source; relisting");
                Some(Phase::BackingOff { delay: self.backoff.next_delay() })
            }
            WatchOutcome::Error(e) => {
                counter!("nexlink_reflector_watch_restarts_total", 1, "reason" => "error");
                warn!(from, error = %e, "watch failed; relisting");
                Some(self.fail(&e))
            }
        }
    }

    /// Consume one watch stream. The flag reports whether any notification arrived.
    async fn watch_session(&mut self, from: u64, cancel: &CancellationToken) -> (WatchOutcome, bool) {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (WatchOutcome::StopRequested, false),
            res = self.source.watch(from) => res,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(SourceError::StaleResourceVersion) => return (WatchOutcome::Stale, false),
            Err(e) => return (WatchOutcome::Error(e), false),
        };
        debug!(from, "watch opened");

        let mut version = from;
        let mut progressed = false;
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break WatchOutcome::StopRequested,
                next = stream.next() => next,
            };
            match next {
                None => break WatchOutcome::Closed,
                Some(Ok(WatchEvent::Bookmark(v))) => {
                    progressed = true;
                    version = version.max(v);
                }
                Some(Ok(WatchEvent::Changed(kind, record))) => {
                    progressed = true;
                    version = version.max(record.version);
                    match kind {
                        ChangeKind::Added | ChangeKind::Modified => {
                            self.upsert(Arc::new(record));
                        }
                        ChangeKind::Deleted => {
                            self.remove(record);
                        }
                    }
                }
                Some(Err(SourceError::Malformed(msg))) => {
                    counter!("nexlink_events_dropped_total", 1);
                    warn!(error = %msg, "dropping malformed watch event");
                }
                Some(Err(SourceError::StaleResourceVersion)) => break WatchOutcome::Stale,
                Some(Err(e)) => break WatchOutcome::Error(e),
            }
        };
        self.health.update(|h| h.version = h.version.max(version));
        (outcome, progressed)
    }

    async fn back_off(&mut self, delay: Duration, cancel: &CancellationToken) -> Option<Phase> {
        self.health.update(|h| h.phase = SourcePhase::BackingOff);
        debug!(delay_ms = delay.as_millis() as u64, "backing off before relist");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(delay) => Some(Phase::Listing),
        }
    }

    fn fail(&mut self, e: &SourceError) -> Phase {
        self.health.update(|h| {
            h.consecutive_failures = h.consecutive_failures.saturating_add(1);
            h.last_error = Some(e.to_string());
        });
        Phase::BackingOff { delay: self.backoff.next_delay() }
    }

    /// Reconcile the store against a full listing; absent keys are implicit deletes.
    /// Keys the source reported but could not decode are left untouched.
    fn replace(&mut self, listing: Listing) -> ListStats {
        let mut stats = ListStats::default();
        let mut seen: FxHashSet<ResourceKey> = listing.skipped.into_iter().collect();
        if !seen.is_empty() {
            warn!(count = seen.len(), "list contained undecodable items; keeping their cached state");
        }
        for item in listing.items {
            seen.insert(item.key.clone());
            match self.upsert(Arc::new(item)) {
                SetOutcome::Inserted => stats.added += 1,
                SetOutcome::Replaced(_) => stats.updated += 1,
                SetOutcome::Stale => {}
            }
        }
        for key in self.store.keys() {
            if seen.contains(&key) {
                continue;
            }
            if self.store.delete_enqueue(&key, None, &self.queue).is_some() {
                debug!(key = %key, "absent from list; deleted");
                stats.deleted += 1;
            }
        }
        stats
    }

    fn upsert(&self, record: Arc<ResourceRecord>) -> SetOutcome {
        let outcome = self.store.set_enqueue(record.clone(), &self.queue);
        match &outcome {
            SetOutcome::Inserted => debug!(key = %record.key, version = record.version, "added"),
            SetOutcome::Replaced(old) => debug!(key = %record.key, from = old.version, to = record.version, "updated"),
            SetOutcome::Stale => {}
        }
        outcome
    }

    fn remove(&self, record: ResourceRecord) {
        let key = record.key.clone();
        let version = record.version;
        match self.store.delete_enqueue(&key, Some(Arc::new(record)), &self.queue) {
            Some(_) => debug!(key = %key, version, "deleted"),
            None => debug!(key = %key, version, "delete for unknown key or stale version ignored"),
        }
    }
}
