use std::time::Duration;

use crate::config::BackoffConfig;

/// Doubling delay capped at `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    cfg: BackoffConfig,
    next: Duration,
}

impl Backoff {
    pub(crate) fn new(cfg: BackoffConfig) -> Self {
        let next = cfg.initial;
        Self { cfg, next }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.cfg.max);
        delay
    }

    pub(crate) fn reset(&mut self) { self.next = self.cfg.initial; }
}
