use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

/// What the reflector is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePhase {
    Starting,
    Listing,
    Watching,
    BackingOff,
    Stopped,
}

/// Liveness view of the connection to the resource source.
#[derive(Debug, Clone)]
pub struct SourceHealth {
    pub phase: SourcePhase,
    /// Failed lists or errored watches since the last successful list.
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_list_at: Option<DateTime<Utc>>,
    /// Highest resource version observed.
    pub version: u64,
}

impl SourceHealth {
    pub fn is_degraded(&self) -> bool { self.consecutive_failures > 0 }
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self { phase: SourcePhase::Starting, consecutive_failures: 0, last_error: None, last_list_at: None, version: 0 }
    }
}

/// Written by the reflector only; read lock-free by anyone.
#[derive(Debug, Default)]
pub(crate) struct HealthCell(ArcSwap<SourceHealth>);

impl HealthCell {
    pub(crate) fn load(&self) -> Arc<SourceHealth> { self.0.load_full() }

    pub(crate) fn update(&self, f: impl FnOnce(&mut SourceHealth)) {
        let mut next = SourceHealth::clone(&self.0.load());
        f(&mut next);
        self.0.store(Arc::new(next));
    }
}
