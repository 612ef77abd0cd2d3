//! Quorumcache - Write-Consistency Core for a Sharded Metadata-Server Fleet
//!
//! A stateless, horizontally-sharded fleet of metadata servers (Nodes) needs
//! a way to keep its in-process caches coherent: when one Node applies a
//! write that invalidates cached state, every other Node holding that state
//! must either observe the invalidation or be known to have dropped out of
//! the fleet before the write is allowed to proceed. This crate is that
//! write-consistency core, independent of any particular storage engine's
//! write path.
//!
//! # Architecture
//!
//! Five components, each addressable on its own:
//!
//! - [`deployment`], the Deployment Router (DR): a pure, stable hash
//!   mapping an inode's parent id to the deployment (shard) responsible for
//!   caching it, and the authorization check a write must pass before it
//!   touches the Shared Store at all.
//! - [`ack_store`], the ACK Store (AS): transactional persistence of
//!   pending-acknowledgement and invalidation rows in the Shared Store,
//!   partitioned per deployment.
//! - [`event`], the Event Subscriber (ES): one long-lived change-stream
//!   operation per registered event, decoding the two fixed ack/invalidation
//!   row schemas and fanning them out to in-process listeners.
//! - [`membership`], the Membership Client (MC): a session with the
//!   external membership service, this Node's own ephemeral registration,
//!   peer enumeration, and children-changed watch dispatch.
//! - [`coordinator`], the Write Coordinator (WC): runs the
//!   authorize/register/subscribe/publish/wait/cleanup protocol for a
//!   single write, built on a count-down [`coordinator::AckLatch`] and a
//!   process-wide [`coordinator::SessionRegistry`] that aborts every
//!   outstanding write the moment the Membership Client's session is lost.
//!
//! [`node::NodeContext`] is the composition root tying these five together
//! for one running process; nothing above it is a global singleton, so a
//! single process can host more than one `NodeContext` if it needs to.

pub mod ack_store;
pub mod config;
pub mod coordinator;
pub mod deployment;
pub mod error;
pub mod event;
pub mod id;
pub mod logging;
pub mod membership;
pub mod node;

pub use config::CoreConfig;
pub use error::{Error, Result};

/// Re-exports of the types most host code needs to wire a Node together.
pub mod prelude {
    pub use crate::ack_store::{AckRow, AckStore, AckStoreApi, InMemoryAckStore, InvalidationRow};
    pub use crate::config::CoreConfig;
    pub use crate::coordinator::{AckLatch, SessionRegistry, WriteCoordinator};
    pub use crate::deployment::DeploymentRouter;
    pub use crate::error::{Error, Result};
    pub use crate::event::{CacheInvalidator, ChangeEvent, EventSubscriber, EventSubscriberApi, MockEventSubscriber};
    pub use crate::id::{OperationIdGenerator, SnowflakeId};
    pub use crate::membership::{MembershipClient, MockMembershipClient, TcpMembershipClient};
    pub use crate::node::NodeContext;
}
