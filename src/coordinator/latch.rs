//! Ack Latch
//!
//! A count-down synchronizer paired with the pending-peer set it counts
//! down. Both live behind one mutex so an acknowledgement and a membership
//! drop for the same peer can never both decrement the latch. The single
//! critical section `decrement`/`reconcile` share is what keeps
//! `latch.count + acked-so-far + dropped-so-far == initial pending set`
//! from ever being violated.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortReason {
    SessionLost,
    Cancelled,
}

struct LatchState {
    pending: HashSet<u64>,
    aborted: Option<AbortReason>,
}

pub struct AckLatch {
    state: Mutex<LatchState>,
    notify: Notify,
}

impl AckLatch {
    pub fn new(pending: HashSet<u64>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LatchState { pending, aborted: None }),
            notify: Notify::new(),
        })
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Remove `target` from the pending set, if present. Returns `false`
    /// when `target` was already gone: either it was never a member, or a
    /// concurrent `reconcile` already removed it. Callers that expect
    /// `target` to be pending treat a `false` return as a protocol
    /// invariant violation.
    pub async fn decrement(&self, target: u64) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.pending.remove(&target);
        if removed && state.pending.is_empty() {
            self.notify.notify_waiters();
        }
        removed
    }

    /// Drop every pending peer absent from `current_members`, returning the
    /// peers removed. An unchanged membership snapshot removes nothing, so
    /// repeated calls are idempotent.
    pub async fn reconcile(&self, current_members: &HashSet<u64>) -> Vec<u64> {
        let mut state = self.state.lock().await;
        let dropped: Vec<u64> = state
            .pending
            .iter()
            .filter(|peer| !current_members.contains(peer))
            .copied()
            .collect();
        for peer in &dropped {
            state.pending.remove(peer);
        }
        if !dropped.is_empty() && state.pending.is_empty() {
            self.notify.notify_waiters();
        }
        dropped
    }

    async fn abort(&self, reason: AbortReason) {
        let mut state = self.state.lock().await;
        if state.aborted.is_none() {
            state.aborted = Some(reason);
            self.notify.notify_waiters();
        }
    }

    /// Fired by the node-wide session-loss callback: every latch currently
    /// waiting must abort rather than hang on peers no longer reachable
    /// through the group.
    pub async fn abort_session_lost(&self) {
        self.abort(AbortReason::SessionLost).await;
    }

    /// Fired by an upper-layer cancellation (e.g. a caller-imposed
    /// wall-clock timeout on `latch.await`).
    pub async fn abort_cancelled(&self) {
        self.abort(AbortReason::Cancelled).await;
    }

    /// Block until every pending peer has acknowledged or dropped out, or
    /// until the latch is aborted. The `notified()` future is constructed
    /// before the state check on each iteration so a notification racing
    /// with this call is never missed.
    pub async fn wait(&self) -> Result<()> {
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock().await;
                if let Some(reason) = state.aborted {
                    return Err(match reason {
                        AbortReason::SessionLost => Error::SessionLost,
                        AbortReason::Cancelled => Error::Cancelled,
                    });
                }
                if state.pending.is_empty() {
                    return Ok(());
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decrement_removes_pending_member_and_completes_wait() {
        let latch = AckLatch::new(HashSet::from([8, 9]));
        assert!(latch.decrement(8).await);
        assert_eq!(latch.count().await, 1);
        assert!(latch.decrement(9).await);
        latch.wait().await.unwrap();
    }

    #[tokio::test]
    async fn decrement_of_unknown_peer_returns_false() {
        let latch = AckLatch::new(HashSet::from([8]));
        assert!(!latch.decrement(99).await);
        assert_eq!(latch.count().await, 1);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_under_unchanged_membership() {
        let latch = AckLatch::new(HashSet::from([8, 9]));
        let members = HashSet::from([8, 9, 1]);
        assert!(latch.reconcile(&members).await.is_empty());
        assert!(latch.reconcile(&members).await.is_empty());
        assert_eq!(latch.count().await, 2);
    }

    #[tokio::test]
    async fn reconcile_drops_peers_missing_from_snapshot() {
        let latch = AckLatch::new(HashSet::from([8, 9]));
        let dropped = latch.reconcile(&HashSet::from([8])).await;
        assert_eq!(dropped, vec![9]);
        assert_eq!(latch.count().await, 1);
    }

    #[tokio::test]
    async fn double_decrement_of_same_peer_only_counts_once() {
        let latch = AckLatch::new(HashSet::from([8]));
        assert!(latch.decrement(8).await);
        assert!(!latch.decrement(8).await);
    }

    #[tokio::test]
    async fn abort_unblocks_wait_with_session_lost() {
        let latch = AckLatch::new(HashSet::from([8]));
        latch.abort_session_lost().await;
        let err = latch.wait().await.unwrap_err();
        assert!(matches!(err, Error::SessionLost));
    }

    #[tokio::test]
    async fn wait_on_already_empty_pending_set_returns_immediately() {
        let latch = AckLatch::new(HashSet::new());
        latch.wait().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_ack_and_reconcile_never_double_count_same_peer() {
        // Both paths race to remove peer 8: an ack for it arrives at the
        // same moment membership reports it gone entirely.
        let latch = AckLatch::new(HashSet::from([8]));
        let a = latch.clone();
        let b = latch.clone();
        let (ack_removed, dropped) = tokio::join!(
            async move { a.decrement(8).await },
            async move { b.reconcile(&HashSet::new()).await },
        );
        let reconcile_removed = dropped.contains(&8);
        // Exactly one of the two critical sections observes peer 8 as
        // still present; the other finds it already gone.
        assert_ne!(ack_removed, reconcile_removed);
        assert_eq!(latch.count().await, 0);
    }
}
