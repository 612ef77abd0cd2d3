//! In-Memory Membership Client
//!
//! A manually-driven test double standing in for the external membership
//! service. Groups, members, and watches all live in a single
//! mutex-guarded table; `drop_member` and `trigger_session_loss` let tests
//! simulate the failures the write coordinator must tolerate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{MembershipClient, SessionLossCallback, WatchCallback, WatchHandle};
use crate::error::Result;

struct Group {
    members: Vec<String>,
    watches: Vec<(u64, WatchCallback)>,
}

#[derive(Default)]
struct State {
    groups: HashMap<String, Group>,
    session_loss_callbacks: HashMap<String, Vec<SessionLossCallback>>,
}

/// Manually-driven membership service double. `connect` always succeeds;
/// group/member/watch state is entirely local to the instance.
pub struct MockMembershipClient {
    state: Mutex<State>,
    next_watch_id: AtomicU64,
}

impl Default for MockMembershipClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMembershipClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_watch_id: AtomicU64::new(1),
        }
    }

    /// Remove a member from a group and fire `ChildrenChanged` to every
    /// watcher of that group, as the real service would on an ephemeral
    /// node's expiry.
    pub async fn drop_member(&self, group: &str, member_id: &str) {
        let mut state = self.state.lock().await;
        let watches = if let Some(g) = state.groups.get_mut(group) {
            g.members.retain(|m| m != member_id);
            g.watches.clone()
        } else {
            Vec::new()
        };
        drop(state);

        let members = self.list_members(group).await.unwrap_or_default();
        for (_, callback) in watches {
            callback(members.clone());
        }
    }

    /// Simulate total session loss for this client: every joined group's
    /// `on_session_loss` callback fires, mirroring a watcher timing out
    /// against the membership service.
    pub async fn trigger_session_loss(&self) {
        let callbacks: Vec<SessionLossCallback> = {
            let state = self.state.lock().await;
            state.session_loss_callbacks.values().flatten().cloned().collect()
        };
        for callback in callbacks {
            callback();
        }
    }
}

#[async_trait]
impl MembershipClient for MockMembershipClient {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn create_group(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.groups.contains_key(name) {
            Ok(false)
        } else {
            state.groups.insert(
                name.to_string(),
                Group {
                    members: Vec::new(),
                    watches: Vec::new(),
                },
            );
            Ok(true)
        }
    }

    async fn join_group(&self, name: &str, member_id: &str, on_session_loss: SessionLossCallback) -> Result<()> {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .entry(name.to_string())
            .or_insert_with(|| Group { members: Vec::new(), watches: Vec::new() });
        if !group.members.iter().any(|m| m == member_id) {
            group.members.push(member_id.to_string());
        }
        state
            .session_loss_callbacks
            .entry(name.to_string())
            .or_default()
            .push(on_session_loss);
        Ok(())
    }

    async fn list_members(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.groups.get(name).map(|g| g.members.clone()).unwrap_or_default())
    }

    async fn add_watch(&self, name: &str, callback: WatchCallback) -> Result<WatchHandle> {
        let mut state = self.state.lock().await;
        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let group = state
            .groups
            .entry(name.to_string())
            .or_insert_with(|| Group { members: Vec::new(), watches: Vec::new() });
        group.watches.push((id, callback));
        Ok(WatchHandle(id))
    }

    async fn remove_watch(&self, name: &str, handle: WatchHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(group) = state.groups.get_mut(name) {
            group.watches.retain(|(id, _)| *id != handle.0);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn join_group_then_list_members_reflects_join() {
        let client = MockMembershipClient::new();
        client.create_group("peers").await.unwrap();
        client
            .join_group("peers", "node-1", Arc::new(|| {}))
            .await
            .unwrap();
        let members = client.list_members("peers").await.unwrap();
        assert_eq!(members, vec!["node-1".to_string()]);
    }

    #[tokio::test]
    async fn drop_member_fires_watch_callback() {
        let client = MockMembershipClient::new();
        client.create_group("peers").await.unwrap();
        client.join_group("peers", "node-1", Arc::new(|| {})).await.unwrap();
        client.join_group("peers", "node-2", Arc::new(|| {})).await.unwrap();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_clone = observed.clone();
        client
            .add_watch(
                "peers",
                Arc::new(move |members| {
                    let observed_clone = observed_clone.clone();
                    tokio::spawn(async move {
                        *observed_clone.lock().await = members;
                    });
                }),
            )
            .await
            .unwrap();

        client.drop_member("peers", "node-1").await;
        tokio::task::yield_now().await;

        let members = client.list_members("peers").await.unwrap();
        assert_eq!(members, vec!["node-2".to_string()]);
    }

    #[tokio::test]
    async fn trigger_session_loss_invokes_every_callback() {
        let client = MockMembershipClient::new();
        client.create_group("peers").await.unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        client
            .join_group("peers", "node-1", Arc::new(move || fired_clone.store(true, Ordering::SeqCst)))
            .await
            .unwrap();

        client.trigger_session_loss().await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
