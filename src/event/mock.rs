//! In-Memory Event Subscriber
//!
//! A manually-driven test double standing in for [`super::EventSubscriber`]'s
//! change-stream plumbing. Listeners are kept per event name in a single
//! mutex-guarded table; `publish` lets a test deliver a [`super::ChangeEvent`]
//! straight to them, the same role a real binlog row would play, without a
//! `MySqlPool` or a TCP replica connection. Grounded in the same
//! `MariaDbExecutor::new_mock()` / `is_mock` test-double shape as
//! [`super::super::ack_store::InMemoryAckStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ChangeEvent, EventSubscriberApi, Listener, ListenerHandle};
use crate::error::Result;

struct ListenerEntry {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct State {
    registered: std::collections::HashSet<String>,
    operations: std::collections::HashSet<String>,
    listeners: HashMap<String, Vec<ListenerEntry>>,
}

pub struct MockEventSubscriber {
    state: Mutex<State>,
    next_listener_id: AtomicU64,
}

impl Default for MockEventSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEventSubscriber {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Number of listeners currently registered for `event_name`. Tests
    /// poll this to know SUBSCRIBE has completed before publishing an ack.
    pub async fn listener_count(&self, event_name: &str) -> usize {
        self.state.lock().await.listeners.get(event_name).map(Vec::len).unwrap_or(0)
    }

    /// Deliver `event` to every listener currently registered for
    /// `event_name`, synchronously in registration order.
    pub async fn publish(&self, event_name: &str, event: ChangeEvent) {
        let snapshot: Vec<Listener> = {
            let state = self.state.lock().await;
            state
                .listeners
                .get(event_name)
                .map(|entries| entries.iter().map(|e| e.listener.clone()).collect())
                .unwrap_or_default()
        };
        for listener in snapshot {
            listener(event.clone());
        }
    }
}

#[async_trait]
impl EventSubscriberApi for MockEventSubscriber {
    async fn register_event(
        &self,
        event_name: &str,
        _table_name: &str,
        _columns: &[String],
        _recreate_if_existing: bool,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.registered.insert(event_name.to_string()))
    }

    async fn create_event_operation(&self, event_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.operations.insert(event_name.to_string());
        state.listeners.entry(event_name.to_string()).or_default();
        Ok(())
    }

    async fn add_listener(&self, event_name: &str, listener: Listener) -> Result<ListenerHandle> {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        state
            .listeners
            .entry(event_name.to_string())
            .or_default()
            .push(ListenerEntry { id, listener });
        Ok(ListenerHandle::new(id))
    }

    async fn remove_listener(&self, event_name: &str, handle: ListenerHandle) {
        let mut state = self.state.lock().await;
        if let Some(entries) = state.listeners.get_mut(event_name) {
            entries.retain(|entry| ListenerHandle::new(entry.id) != handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeKind, ColumnValue, RowView};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn sample_event() -> ChangeEvent {
        let mut post = RowView::new();
        post.insert("op_id", ColumnValue::BigInt(42));
        ChangeEvent {
            kind: ChangeKind::Update,
            event_name: "ack-events-0".into(),
            table_name: "write_acks_deployment0".into(),
            post,
            pre: None,
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_registered_listener() {
        let subscriber = MockEventSubscriber::new();
        subscriber.create_event_operation("ack-events-0").await.unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        subscriber
            .add_listener(
                "ack-events-0",
                Arc::new(move |_event| fired_clone.store(true, Ordering::SeqCst)),
            )
            .await
            .unwrap();

        subscriber.publish("ack-events-0", sample_event()).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn removed_listener_no_longer_receives_events() {
        let subscriber = MockEventSubscriber::new();
        subscriber.create_event_operation("ack-events-0").await.unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let handle = subscriber
            .add_listener(
                "ack-events-0",
                Arc::new(move |_event| fired_clone.store(true, Ordering::SeqCst)),
            )
            .await
            .unwrap();
        subscriber.remove_listener("ack-events-0", handle).await;

        subscriber.publish("ack-events-0", sample_event()).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn listener_count_reflects_registrations() {
        let subscriber = MockEventSubscriber::new();
        subscriber.create_event_operation("ack-events-0").await.unwrap();
        assert_eq!(subscriber.listener_count("ack-events-0").await, 0);

        subscriber
            .add_listener("ack-events-0", Arc::new(|_event| {}))
            .await
            .unwrap();
        assert_eq!(subscriber.listener_count("ack-events-0").await, 1);
    }
}
