//! Event Subscriber (ES)
//!
//! Maintains one long-lived change-stream operation per registered event
//! name, decodes rows for the two fixed schemas this core understands, and
//! fans them out to registered in-process listeners. INSERT events on the
//! ack table and UPDATE events for unrelated operation ids are delivered
//! like any other event; it is the write coordinator's filter, not this
//! module's, that discards them. The subscriber itself makes no judgment
//! about which writer cares about which row.

mod change;
mod decode;
mod descriptor;
mod mock;
mod schema;
mod stream;

pub use change::{ChangeEvent, ChangeKind, ColumnValue, RowView};
pub use descriptor::EventDescriptor;
pub use mock::MockEventSubscriber;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sqlx::MySqlPool;
use tokio::sync::{oneshot, Mutex};

use self::descriptor::DescriptorStore;
use self::stream::{parse_mysql_dsn, ChangeStreamConnection, ReplicaEndpoint};
use crate::config::CoreConfig;
use crate::error::{Error, Result};

/// A listener invoked for every change delivered on a subscription. Plain
/// closures, not an interface hierarchy, one per write, matching the
/// per-write lifetime of the thing registering it. Held behind an `Arc` so
/// dispatch can hand a clone to a worker task without holding the
/// listener-list lock for the call's duration.
pub type Listener = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Signals that the local cache can no longer be trusted and must be
/// dropped wholesale. Invoked after repeated subscription failures and by
/// the membership client on session loss.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate_all(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

/// The Write Coordinator's view of the Event Subscriber: the slice of its
/// surface needed to run SUBSCRIBE and tear it down again. [`MockEventSubscriber`]
/// implements this without a change stream or a Shared Store connection, so
/// the protocol's SUBSCRIBE-before-INSERT_INVS ordering can be driven in a
/// test the same way [`crate::membership::MockMembershipClient`] stands in
/// for a live `TcpMembershipClient`.
#[async_trait]
pub trait EventSubscriberApi: Send + Sync {
    async fn register_event(
        &self,
        event_name: &str,
        table_name: &str,
        columns: &[String],
        recreate_if_existing: bool,
    ) -> Result<bool>;

    async fn create_event_operation(&self, event_name: &str) -> Result<()>;

    async fn add_listener(&self, event_name: &str, listener: Listener) -> Result<ListenerHandle>;

    async fn remove_listener(&self, event_name: &str, handle: ListenerHandle);
}

struct ListenerEntry {
    id: u64,
    listener: Listener,
}

struct SubscriptionHandle {
    table_name: String,
    listeners: Mutex<Vec<ListenerEntry>>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

pub struct EventSubscriber {
    descriptors: DescriptorStore,
    endpoint: ReplicaEndpoint,
    retry_backoff: Duration,
    retry_max: u32,
    subscriptions: Mutex<HashMap<String, Arc<SubscriptionHandle>>>,
    next_listener_id: AtomicU64,
    cache_invalidator: Option<Arc<dyn CacheInvalidator>>,
}

impl EventSubscriber {
    pub fn new(
        config: &CoreConfig,
        pool: MySqlPool,
        cache_invalidator: Option<Arc<dyn CacheInvalidator>>,
    ) -> Result<Self> {
        let endpoint = parse_mysql_dsn(&config.shared_store.dsn, config.event.server_id)?;
        Ok(Self {
            descriptors: DescriptorStore::new(pool),
            endpoint,
            retry_backoff: config.event_retry_backoff(),
            retry_max: config.event.retry_max,
            subscriptions: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            cache_invalidator,
        })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.descriptors.ensure_schema().await
    }

    /// Idempotent creation of a named subscription descriptor.
    pub async fn register_event(
        &self,
        event_name: &str,
        table_name: &str,
        columns: &[String],
        recreate_if_existing: bool,
    ) -> Result<bool> {
        let created_at = now_millis();
        self.descriptors
            .register(event_name, table_name, columns, recreate_if_existing, created_at)
            .await
    }

    pub async fn unregister_event(&self, event_name: &str) -> Result<bool> {
        self.drop_event_operation(event_name).await?;
        self.descriptors.unregister(event_name).await
    }

    /// Start the change-stream task for a registered event, if not already
    /// running. No-op if it is.
    pub async fn create_event_operation(&self, event_name: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(event_name) {
            return Ok(());
        }

        let descriptor = self
            .descriptors
            .fetch(event_name)
            .await?
            .ok_or_else(|| Error::Subscription(format!("no descriptor registered for {event_name}")))?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = Arc::new(SubscriptionHandle {
            table_name: descriptor.table_name.clone(),
            listeners: Mutex::new(Vec::new()),
            cancel: Mutex::new(Some(cancel_tx)),
        });

        let dispatch_handle = handle.clone();
        let endpoint = self.endpoint.clone();
        let event_name_owned = event_name.to_string();
        let table_name = descriptor.table_name.clone();
        let retry_backoff = self.retry_backoff;
        let retry_max = self.retry_max;
        let cache_invalidator = self.cache_invalidator.clone();

        tokio::spawn(async move {
            run_dispatch_loop(
                dispatch_handle,
                event_name_owned,
                table_name,
                endpoint,
                retry_backoff,
                retry_max,
                cache_invalidator,
                cancel_rx,
            )
            .await;
        });

        subscriptions.insert(event_name.to_string(), handle);
        Ok(())
    }

    pub async fn drop_event_operation(&self, event_name: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(handle) = subscriptions.remove(event_name) {
            if let Some(cancel) = handle.cancel.lock().await.take() {
                let _ = cancel.send(());
            }
        }
        Ok(())
    }

    pub async fn add_listener(&self, event_name: &str, listener: Listener) -> Result<ListenerHandle> {
        let subscriptions = self.subscriptions.lock().await;
        let handle = subscriptions
            .get(event_name)
            .ok_or_else(|| Error::Subscription(format!("{event_name} has no active operation")))?;
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        handle.listeners.lock().await.push(ListenerEntry { id, listener });
        Ok(ListenerHandle(id))
    }

    pub async fn remove_listener(&self, event_name: &str, handle: ListenerHandle) {
        let subscriptions = self.subscriptions.lock().await;
        if let Some(sub) = subscriptions.get(event_name) {
            sub.listeners.lock().await.retain(|entry| entry.id != handle.0);
        }
    }
}

#[async_trait]
impl EventSubscriberApi for EventSubscriber {
    async fn register_event(
        &self,
        event_name: &str,
        table_name: &str,
        columns: &[String],
        recreate_if_existing: bool,
    ) -> Result<bool> {
        EventSubscriber::register_event(self, event_name, table_name, columns, recreate_if_existing).await
    }

    async fn create_event_operation(&self, event_name: &str) -> Result<()> {
        EventSubscriber::create_event_operation(self, event_name).await
    }

    async fn add_listener(&self, event_name: &str, listener: Listener) -> Result<ListenerHandle> {
        EventSubscriber::add_listener(self, event_name, listener).await
    }

    async fn remove_listener(&self, event_name: &str, handle: ListenerHandle) {
        EventSubscriber::remove_listener(self, event_name, handle).await
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_dispatch_loop(
    handle: Arc<SubscriptionHandle>,
    event_name: String,
    table_name: String,
    endpoint: ReplicaEndpoint,
    retry_backoff: Duration,
    retry_max: u32,
    cache_invalidator: Option<Arc<dyn CacheInvalidator>>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut watched = HashMap::new();
    watched.insert(table_name, event_name.clone());

    let mut consecutive_failures = 0u32;

    loop {
        if cancel_rx.try_recv().is_ok() {
            return;
        }

        let mut conn = match ChangeStreamConnection::connect(&endpoint).await {
            Ok(conn) => {
                consecutive_failures = 0;
                conn
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(event_name = %event_name, attempt = consecutive_failures, error = %e, "change stream connect failed");
                if consecutive_failures >= retry_max {
                    tracing::error!(event_name = %event_name, "change stream exhausted retries, signalling degraded mode");
                    if let Some(invalidator) = &cache_invalidator {
                        invalidator.invalidate_all();
                    }
                    return;
                }
                tokio::time::sleep(retry_backoff).await;
                continue;
            }
        };

        loop {
            tokio::select! {
                _ = &mut cancel_rx => return,
                result = conn.next_event(&watched) => {
                    match result {
                        Ok(Some(event)) => {
                            dispatch(&handle, event).await;
                        }
                        Ok(None) => break, // stream ended, reconnect
                        Err(e) => {
                            tracing::warn!(event_name = %event_name, error = %e, "change stream read failed");
                            break;
                        }
                    }
                }
            }
        }

        tokio::time::sleep(retry_backoff).await;
    }
}

async fn dispatch(handle: &Arc<SubscriptionHandle>, event: ChangeEvent) {
    // Clone the listener list under the lock, then run each listener on a
    // blocking worker so a slow or panicking listener cannot stall dispatch
    // to its siblings or to the stream-reading task itself.
    let snapshot: Vec<Listener> = handle
        .listeners
        .lock()
        .await
        .iter()
        .map(|entry| entry.listener.clone())
        .collect();

    for listener in snapshot {
        let event = event.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)))
        })
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(_panic)) => {
                tracing::error!("listener panicked during dispatch; isolated, dispatch continues");
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "listener worker task failed to join");
            }
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_handle_equality_is_id_based() {
        assert_eq!(ListenerHandle(1), ListenerHandle(1));
        assert_ne!(ListenerHandle(1), ListenerHandle(2));
    }
}
