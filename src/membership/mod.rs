//! Membership Client (MC)
//!
//! Represents "who is currently alive in this deployment": wraps a session
//! with the external membership service, publishes this Node's ephemeral
//! membership, enumerates peers, and dispatches children-changed watch
//! events. Membership reports are best-effort; the write coordinator always
//! reconciles watch events against its own pending set rather than trusting
//! a snapshot to be current.

mod frame;
mod mock;
mod protocol;
mod tcp;

pub use mock::MockMembershipClient;
pub use tcp::TcpMembershipClient;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Invoked whenever this Node's membership session is lost. The local Node
/// uses this to invalidate its entire metadata cache, since it can no
/// longer stand behind any freshness guarantee already issued to readers.
pub type SessionLossCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked at least once per children-changed event on a watched group.
/// Spurious fires (no actual membership change) are allowed.
pub type WatchCallback = Arc<dyn Fn(Vec<String>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(u64);

#[async_trait]
pub trait MembershipClient: Send + Sync {
    /// Establish a session with the membership service. Safe to call
    /// repeatedly; retries with exponential backoff internally.
    async fn connect(&self) -> Result<()>;

    /// Idempotent create of the group's durable node. Not an error if it
    /// already exists.
    async fn create_group(&self, name: &str) -> Result<bool>;

    /// Register an ephemeral child under the group. `on_session_loss` fires
    /// whenever the session is subsequently lost.
    async fn join_group(&self, name: &str, member_id: &str, on_session_loss: SessionLossCallback) -> Result<()>;

    /// Snapshot of current members.
    async fn list_members(&self, name: &str) -> Result<Vec<String>>;

    /// Persistent watch on children-changed events for `name`.
    async fn add_watch(&self, name: &str, callback: WatchCallback) -> Result<WatchHandle>;

    async fn remove_watch(&self, name: &str, handle: WatchHandle) -> Result<()>;

    /// Graceful session termination; the ephemeral node is expunged
    /// promptly.
    async fn close(&self) -> Result<()>;
}
