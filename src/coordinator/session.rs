//! Session-Wide Latch Registry
//!
//! The Membership Client session is one per process, shared by every
//! `WriteCoordinator` invocation running concurrently. When that session is
//! lost, every latch currently waiting must abort rather than hang forever
//! on peers that can no longer be reached through the group. This registry
//! is the node-level hook the session-loss callback fires through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use super::latch::AckLatch;

#[derive(Default)]
pub struct SessionRegistry {
    latches: Mutex<HashMap<u64, Weak<AckLatch>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) async fn register(&self, latch: &Arc<AckLatch>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.latches.lock().await.insert(id, Arc::downgrade(latch));
        id
    }

    pub(crate) async fn unregister(&self, id: u64) {
        self.latches.lock().await.remove(&id);
    }

    /// Abort every latch currently registered. Called from the Membership
    /// Client's session-loss callback. Dead registrations (writes that
    /// already finished) are pruned as a side effect.
    pub async fn abort_all(&self) {
        let mut registry = self.latches.lock().await;
        let alive: Vec<Arc<AckLatch>> = registry.values().filter_map(Weak::upgrade).collect();
        registry.clear();
        drop(registry);

        for latch in alive {
            latch.abort_session_lost().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn abort_all_aborts_every_registered_latch() {
        let registry = SessionRegistry::new();
        let a = AckLatch::new(HashSet::from([1]));
        let b = AckLatch::new(HashSet::from([2]));
        registry.register(&a).await;
        registry.register(&b).await;

        registry.abort_all().await;

        assert!(a.wait().await.is_err());
        assert!(b.wait().await.is_err());
    }

    #[tokio::test]
    async fn unregister_excludes_a_latch_from_abort_all() {
        let registry = SessionRegistry::new();
        let a = AckLatch::new(HashSet::new());
        let id = registry.register(&a).await;
        registry.unregister(id).await;

        registry.abort_all().await;

        // Already-drained latch: wait() succeeds regardless, but verifies
        // abort_all did not need to touch it to reach Ok.
        assert!(a.wait().await.is_ok());
    }

    #[tokio::test]
    async fn dropped_latch_is_pruned_without_panicking() {
        let registry = SessionRegistry::new();
        {
            let a = AckLatch::new(HashSet::from([1]));
            registry.register(&a).await;
        } // `a` dropped; only the registry's Weak remains

        registry.abort_all().await;
    }
}
