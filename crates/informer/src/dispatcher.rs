use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use metrics::counter;
use nexlink_core::{ChangeEvent, ChangeHandler};
use nexlink_store::DeltaQueue;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::sync_state::SyncState;

/// Single consumer of the delta queue.
///
/// Handler calls are made inline on this task. The dispatcher imposes no
/// timeout, so a handler that blocks stalls delivery of everything behind it.
pub struct Dispatcher {
    queue: Arc<DeltaQueue>,
    handler: Arc<dyn ChangeHandler>,
    sync: SyncState,
}

impl Dispatcher {
    pub fn new(queue: Arc<DeltaQueue>, handler: Arc<dyn ChangeHandler>, sync: SyncState) -> Self {
        Self { queue, handler, sync }
    }

    pub async fn run(self, cancel: CancellationToken) {
        while let Some(ev) = self.queue.pop(&cancel).await {
            self.dispatch(ev);
        }
        info!("dispatcher stopped");
    }

    /// Deliver one event. Failures and panics are logged, never propagated.
    pub fn dispatch(&self, ev: ChangeEvent) {
        let event = ev.label();
        let key = ev.key().map(ToString::to_string).unwrap_or_default();
        trace!(key = %key, event, "dispatch");
        let res = match ev {
            ChangeEvent::Synced => {
                if self.sync.mark_synced() {
                    info!("initial sync complete");
                }
                return;
            }
            ChangeEvent::Added(r) => guarded(|| self.handler.on_add(&r)),
            ChangeEvent::Updated { old, new } => guarded(|| self.handler.on_update(&old, &new)),
            ChangeEvent::Deleted(r) => guarded(|| self.handler.on_delete(&r)),
        };
        if let Err(e) = res {
            counter!("nexlink_handler_failures_total", 1, "event" => event);
            warn!(key = %key, event, error = %e, "handler failed");
        }
    }
}

fn guarded(f: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(anyhow!("handler panicked: {}", panic_message(&payload))))
}

fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
