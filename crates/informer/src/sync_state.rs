use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One-way readiness flag: false until the initial listing has been
/// delivered to the handler, then true forever.
#[derive(Debug, Clone)]
pub struct SyncState {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for SyncState {
    fn default() -> Self { Self::new() }
}

impl SyncState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn has_synced(&self) -> bool { *self.tx.borrow() }

    /// Returns true only for the call that performed the transition.
    pub fn mark_synced(&self) -> bool {
        self.tx.send_if_modified(|synced| {
            if *synced {
                false
            } else {
                *synced = true;
                true
            }
        })
    }

    /// Block until synced or cancelled; returns the flag's final value.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            res = rx.wait_for(|synced| *synced) => res.is_ok(),
            _ = cancel.cancelled() => self.has_synced(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_exactly_once() {
        let s = SyncState::new();
        assert!(!s.has_synced());
        assert!(s.mark_synced());
        assert!(!s.mark_synced());
        assert!(s.clone().has_synced());
    }

    #[tokio::test]
    async fn wait_observes_later_transition() {
        let s = SyncState::new();
        let cancel = CancellationToken::new();
        let waiter = tokio::spawn({
            let s = s.clone();
            let cancel = cancel.clone();
            async move { s.wait(&cancel).await }
        });
        s.mark_synced();
        assert!(waiter.await.expect("join"));
    }

    #[tokio::test]
    async fn wait_returns_false_on_cancel() {
        let s = SyncState::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!s.wait(&cancel).await);
    }
}
