//! Nexlink informer: keeps a [`ResourceStore`] in sync with a
//! [`ResourceSource`] and feeds a [`ChangeHandler`].
//!
//! Three tasks cooperate through the store and the delta queue only:
//! the [`Reflector`] (list, then watch, relist on failure), the
//! [`Dispatcher`] (drains the queue into the handler), and the
//! [`ResyncTimer`] (periodic synthetic updates). All of them stop when the
//! shared cancellation token fires.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nexlink_core::{ChangeHandler, ConfigError, ResourceSource};
use nexlink_store::{DeltaQueue, ResourceStore};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod backoff;
mod config;
mod dispatcher;
mod health;
mod reflector;
mod resync;
mod sync_state;

pub use config::{BackoffConfig, InformerConfig};
pub use dispatcher::Dispatcher;
pub use health::{SourceHealth, SourcePhase};
pub use reflector::Reflector;
pub use resync::ResyncTimer;
pub use sync_state::SyncState;

use health::HealthCell;

#[derive(Debug, Error)]
pub enum InformerError {
    #[error("informer already started")]
    AlreadyStarted,
}

/// One synchronization engine bound to one source. Several can live in one
/// process, each with its own store.
pub struct Informer {
    source: Arc<dyn ResourceSource>,
    config: InformerConfig,
    store: Arc<ResourceStore>,
    queue: Arc<DeltaQueue>,
    sync: SyncState,
    health: Arc<HealthCell>,
    started: AtomicBool,
}

impl Informer {
    /// Fails if `config` has an unusable backoff.
    pub fn new(source: Arc<dyn ResourceSource>, config: InformerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            store: Arc::new(ResourceStore::new()),
            queue: Arc::new(DeltaQueue::new()),
            sync: SyncState::new(),
            health: Arc::new(HealthCell::default()),
            started: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<ResourceStore> { &self.store }

    pub fn has_synced(&self) -> bool { self.sync.has_synced() }

    /// Wait until the handler has seen the whole initial listing.
    /// Returns false if cancelled first.
    pub async fn wait_for_sync(&self, cancel: &CancellationToken) -> bool { self.sync.wait(cancel).await }

    pub fn health(&self) -> Arc<SourceHealth> { self.health.load() }

    /// Spawn reflector, dispatcher and resync timer on the current runtime.
    pub fn spawn(&self, handler: Arc<dyn ChangeHandler>, cancel: CancellationToken) -> Result<InformerTasks, InformerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(InformerError::AlreadyStarted);
        }
        let reflector = Reflector::new(
            self.source.clone(),
            self.store.clone(),
            self.queue.clone(),
            self.health.clone(),
            self.config.backoff.clone(),
        );
        let dispatcher = Dispatcher::new(self.queue.clone(), handler, self.sync.clone());
        let resync = ResyncTimer::new(self.config.resync, self.store.clone(), self.queue.clone());
        info!(resync_secs = self.config.resync.as_secs(), "informer starting");
        Ok(InformerTasks {
            handles: vec![
                ("reflector", tokio::spawn(reflector.run(cancel.clone()))),
                ("dispatcher", tokio::spawn(dispatcher.run(cancel.clone()))),
                ("resync", tokio::spawn(resync.run(cancel))),
            ],
        })
    }
}

/// Join handles of a running informer.
pub struct InformerTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl InformerTasks {
    /// Wait for every task to finish (after cancellation).
    pub async fn join(self) {
        for (task, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(task, error = %e, "informer task failed");
            }
        }
    }
}
