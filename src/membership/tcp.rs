//! TCP-Backed Membership Client
//!
//! Speaks the framed protocol in `super::protocol` against one membership
//! service endpoint at a time. A single background task owns the read half
//! of the connection: it routes response envelopes back to the caller
//! awaiting them and dispatches unsolicited `ChildrenChanged` pushes to
//! registered watch callbacks. Session loss, a read error or EOF, fans
//! out to every registered `on_session_loss` callback exactly once.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};

use super::frame::{read_envelope, write_envelope};
use super::protocol::{Envelope, Message};
use super::{MembershipClient, SessionLossCallback, WatchCallback, WatchHandle};
use crate::error::{Error, Result};

const MAX_CONNECT_ATTEMPTS: u32 = 8;

struct ConnInner {
    write_half: Mutex<OwnedWriteHalf>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    watches: Mutex<HashMap<String, Vec<(u64, WatchCallback)>>>,
    session_loss_callbacks: Mutex<Vec<SessionLossCallback>>,
    alive: AtomicBool,
    next_request_id: AtomicU64,
    next_watch_id: AtomicU64,
}

pub struct TcpMembershipClient {
    hosts: Vec<String>,
    connect_timeout: Duration,
    inner: Mutex<Option<Arc<ConnInner>>>,
}

impl TcpMembershipClient {
    pub fn new(hosts: Vec<String>, connect_timeout: Duration) -> Self {
        Self {
            hosts,
            connect_timeout,
            inner: Mutex::new(None),
        }
    }

    async fn current_inner(&self) -> Result<Arc<ConnInner>> {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(inner) if inner.alive.load(Ordering::Acquire) => Ok(inner.clone()),
            _ => Err(Error::SessionLost),
        }
    }

    async fn request(&self, message: Message) -> Result<Message> {
        let inner = self.current_inner().await?;
        let request_id = inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().await.insert(request_id, tx);

        {
            let mut writer = inner.write_half.lock().await;
            if let Err(e) = write_envelope(&mut *writer, &Envelope { request_id, message }).await {
                inner.pending.lock().await.remove(&request_id);
                return Err(e);
            }
        }

        match tokio::time::timeout(self.connect_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::SessionLost),
            Err(_) => Err(Error::ConnectionTimeout("membership request timed out".into())),
        }
    }
}

#[async_trait]
impl MembershipClient for TcpMembershipClient {
    async fn connect(&self) -> Result<()> {
        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(100);

        loop {
            let host = &self.hosts[(attempt as usize) % self.hosts.len()];
            match connect_once(host, self.connect_timeout).await {
                Ok(inner) => {
                    *self.inner.lock().await = Some(inner);
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_CONNECT_ATTEMPTS {
                        return Err(e);
                    }
                    tracing::warn!(host = %host, attempt, error = %e, "membership connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(10));
                }
            }
        }
    }

    async fn create_group(&self, name: &str) -> Result<bool> {
        match self.request(Message::CreateGroup { path: name.to_string() }).await? {
            Message::CreateGroupAck { created } => Ok(created),
            Message::Error { message } => Err(Error::Membership(message)),
            other => Err(Error::Protocol(format!("unexpected response to CreateGroup: {other:?}"))),
        }
    }

    async fn join_group(&self, name: &str, member_id: &str, on_session_loss: SessionLossCallback) -> Result<()> {
        match self
            .request(Message::JoinGroup {
                path: name.to_string(),
                member_id: member_id.to_string(),
            })
            .await?
        {
            Message::JoinGroupAck => {
                let inner = self.current_inner().await?;
                inner.session_loss_callbacks.lock().await.push(on_session_loss);
                Ok(())
            }
            Message::Error { message } => Err(Error::Membership(message)),
            other => Err(Error::Protocol(format!("unexpected response to JoinGroup: {other:?}"))),
        }
    }

    async fn list_members(&self, name: &str) -> Result<Vec<String>> {
        match self.request(Message::ListMembers { path: name.to_string() }).await? {
            Message::ListMembersResponse { members } => Ok(members),
            Message::Error { message } => Err(Error::Membership(message)),
            other => Err(Error::Protocol(format!("unexpected response to ListMembers: {other:?}"))),
        }
    }

    async fn add_watch(&self, name: &str, callback: WatchCallback) -> Result<WatchHandle> {
        match self.request(Message::AddWatch { path: name.to_string() }).await? {
            Message::AddWatchAck => {
                let inner = self.current_inner().await?;
                let id = inner.next_watch_id.fetch_add(1, Ordering::Relaxed);
                inner
                    .watches
                    .lock()
                    .await
                    .entry(name.to_string())
                    .or_default()
                    .push((id, callback));
                Ok(WatchHandle(id))
            }
            Message::Error { message } => Err(Error::Membership(message)),
            other => Err(Error::Protocol(format!("unexpected response to AddWatch: {other:?}"))),
        }
    }

    async fn remove_watch(&self, name: &str, handle: WatchHandle) -> Result<()> {
        match self.request(Message::RemoveWatch { path: name.to_string() }).await? {
            Message::RemoveWatchAck => {
                let inner = self.current_inner().await?;
                if let Some(watches) = inner.watches.lock().await.get_mut(name) {
                    watches.retain(|(id, _)| *id != handle.0);
                }
                Ok(())
            }
            Message::Error { message } => Err(Error::Membership(message)),
            other => Err(Error::Protocol(format!("unexpected response to RemoveWatch: {other:?}"))),
        }
    }

    async fn close(&self) -> Result<()> {
        let result = self.request(Message::Close).await;
        if let Some(inner) = self.inner.lock().await.take() {
            inner.alive.store(false, Ordering::Release);
        }
        match result {
            Ok(Message::CloseAck) | Err(Error::SessionLost) => Ok(()),
            Ok(other) => Err(Error::Protocol(format!("unexpected response to Close: {other:?}"))),
            Err(e) => Err(e),
        }
    }
}

async fn connect_once(host: &str, connect_timeout: Duration) -> Result<Arc<ConnInner>> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(host))
        .await
        .map_err(|_| Error::ConnectionTimeout(host.to_string()))?
        .map_err(|e| Error::ConnectionFailed {
            address: host.to_string(),
            reason: e.to_string(),
        })?;
    stream.set_nodelay(true)?;

    let (mut read_half, mut write_half) = stream.into_split();
    write_envelope(&mut write_half, &Envelope { request_id: 0, message: Message::Connect }).await?;
    let ack = read_envelope(&mut read_half).await?;
    match ack.message {
        Message::ConnectAck { .. } => {}
        Message::Error { message } => return Err(Error::Membership(message)),
        other => return Err(Error::Protocol(format!("unexpected handshake response: {other:?}"))),
    }

    let inner = Arc::new(ConnInner {
        write_half: Mutex::new(write_half),
        pending: Mutex::new(HashMap::new()),
        watches: Mutex::new(HashMap::new()),
        session_loss_callbacks: Mutex::new(Vec::new()),
        alive: AtomicBool::new(true),
        next_request_id: AtomicU64::new(1),
        next_watch_id: AtomicU64::new(1),
    });

    tokio::spawn(reader_loop(read_half, inner.clone()));

    Ok(inner)
}

async fn reader_loop(mut read_half: OwnedReadHalf, inner: Arc<ConnInner>) {
    loop {
        match read_envelope(&mut read_half).await {
            Ok(envelope) => route(&inner, envelope).await,
            Err(e) => {
                tracing::error!(error = %e, "membership connection lost");
                on_session_loss(&inner).await;
                return;
            }
        }
    }
}

async fn route(inner: &Arc<ConnInner>, envelope: Envelope) {
    if let Message::ChildrenChanged { path, members } = &envelope.message {
        let callbacks: Vec<WatchCallback> = inner
            .watches
            .lock()
            .await
            .get(path)
            .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in callbacks {
            let members = members.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(AssertUnwindSafe(|| callback(members)))
            })
            .await;
            if matches!(outcome, Ok(Err(_)) | Err(_)) {
                tracing::error!("membership watch callback panicked; isolated");
            }
        }
        return;
    }

    if let Some(tx) = inner.pending.lock().await.remove(&envelope.request_id) {
        let _ = tx.send(envelope.message);
    }
}

async fn on_session_loss(inner: &Arc<ConnInner>) {
    inner.alive.store(false, Ordering::Release);
    let pending = std::mem::take(&mut *inner.pending.lock().await);
    drop(pending); // drop every sender: awaiting callers observe SessionLost

    let callbacks = inner.session_loss_callbacks.lock().await.clone();
    for callback in callbacks {
        callback();
    }
}
