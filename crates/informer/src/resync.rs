use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use nexlink_store::{DeltaQueue, ResourceStore};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodically re-announces every cached record as `Updated(r, r)`.
pub struct ResyncTimer {
    interval: Duration,
    store: Arc<ResourceStore>,
    queue: Arc<DeltaQueue>,
}

impl ResyncTimer {
    pub fn new(interval: Duration, store: Arc<ResourceStore>, queue: Arc<DeltaQueue>) -> Self {
        Self { interval, store, queue }
    }

    pub async fn run(self, cancel: CancellationToken) {
        if self.interval.is_zero() {
            debug!("resync disabled");
            return;
        }
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
        info!("resync timer stopped");
    }

    /// Enqueue one synthetic update per cached record; returns how many.
    pub fn tick(&self) -> usize {
        let n = self.store.resync_enqueue(&self.queue);
        counter!("nexlink_resync_events_total", n as u64);
        debug!(count = n, "resync");
        n
    }
}
