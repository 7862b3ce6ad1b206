//! Push-channel sync client.
//!
//! Owns the persistent WebSocket connection to the annotation server and the
//! reconnect/backoff state machine around it:
//!
//! ```text
//!            connect()               onOpen
//! Disconnected ──────► Connecting ──────────► Open
//!      ▲                  │  ▲                 │
//!      │        onError/  │  │ timer           │ onClose(abnormal)
//!      │        onClose   ▼  │ elapses         ▼
//!      │            Reconnecting(n, d) ◄───────┘
//!      │                  │
//!      └──────────────────┘ n > max_attempts (fires SyncLost once)
//! ```
//!
//! Backoff is exponential, `d(n) = min(base · 2^(n-1), cap)`, and the attempt
//! counter resets every time the channel reaches `Open`.
//!
//! Outbound writes never travel over the channel: they go through the
//! [`PersistenceGateway`] request/response API, and the resulting broadcast
//! comes back like any other client's change. The originating client
//! reconciles its optimistic record from whichever arrives first — the
//! direct response (`confirm`) or the broadcast echo — and the store's
//! idempotent apply makes the second arrival a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use glossa_core::{
    AnnotationDraft, AnnotationId, AnnotationPatch, AnnotationRecord, AnnotationStore, Applied,
    RemoteEvent, Scope, StoreError,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::gateway::{GatewayError, PersistenceGateway};
use crate::protocol::ChannelMessage;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting { attempt: u32, next_delay: Duration },
}

/// Exponential backoff arithmetic, kept pure so it is testable on its own.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub cap_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `n` (1-based):
    /// `min(base · 2^(n-1), cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.cap_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_delay: Duration,
    pub cap_delay: Duration,
    pub max_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Buffered events per subscriber.
    pub event_capacity: usize,
    /// Re-fetch the whole scope after every re-established connection.
    /// Off by default: forward event delivery is the source behavior, and
    /// events missed while disconnected stay missed (orphan updates are
    /// dropped on arrival).
    pub reload_on_reconnect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
            max_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            event_capacity: 256,
            reload_on_reconnect: false,
        }
    }
}

impl SyncConfig {
    fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.base_delay,
            cap_delay: self.cap_delay,
            max_attempts: self.max_attempts,
        }
    }
}

/// Events fanned out to every subscriber of one scope's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    RemoteCreated(AnnotationId),
    RemoteUpdated(AnnotationId),
    RemoteDeleted(AnnotationId),
    /// Reconnection attempts exhausted. Live updates stay unavailable until
    /// a manual [`SyncClient::load`]; fired exactly once per give-up.
    SyncLost,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Durable write rejected or unreachable; the optimistic mutation has
    /// been rolled back and the action may be retried.
    #[error("durable write failed: {0}")]
    WriteRejected(#[from] GatewayError),
    #[error("sync client is shut down")]
    Closed,
}

/// Does an inbound event belong to the active scope?
///
/// A record belongs to exactly one partition, so membership is structural
/// equality of scopes. `deleted` events carry only an id; for those the
/// envelope's `scopeId` hint decides, and when the server sent no hint the
/// event passes through — deleting an unknown id is already a no-op.
fn event_in_scope(active: &Scope, event: &RemoteEvent, scope_hint: Option<&str>) -> bool {
    match event {
        RemoteEvent::Created(record) | RemoteEvent::Updated(record) => &record.scope == active,
        RemoteEvent::Deleted(_) => scope_hint.map_or(true, |hint| hint == active.key()),
    }
}

/// How a pumping connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseKind {
    /// Normal close code: explicit teardown, no reconnect.
    Normal,
    /// Everything else: error, dropped socket, abnormal close code.
    Abnormal,
}

/// State shared between the client handle and its connection task.
struct ChannelTask {
    scope: Scope,
    channel_url: String,
    config: SyncConfig,
    gateway: Arc<PersistenceGateway>,
    store: Arc<Mutex<AnnotationStore>>,
    state: Arc<RwLock<ConnectionState>>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: Arc<Notify>,
    alive: Arc<AtomicBool>,
}

impl ChannelTask {
    async fn set_state(&self, next: ConnectionState) {
        *self.state.write().await = next;
    }

    /// Supervising loop: connect, pump, back off, retry, give up.
    async fn run(self) {
        let policy = self.config.policy();
        let mut attempt: u32 = 0;

        loop {
            if !self.alive.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected).await;
                return;
            }

            self.set_state(ConnectionState::Connecting).await;
            match tokio_tungstenite::connect_async(&self.channel_url).await {
                Ok((socket, _response)) => {
                    let resumed = attempt > 0;
                    attempt = 0;
                    self.set_state(ConnectionState::Open).await;
                    let _ = self.events.send(SyncEvent::Connected);
                    log::info!("channel open for scope {}", self.scope);

                    if resumed && self.config.reload_on_reconnect {
                        match self.reload().await {
                            Ok(count) => log::info!("reloaded {count} records after reconnect"),
                            Err(e) => log::warn!("scope reload after reconnect failed: {e}"),
                        }
                    }

                    let outcome = self.pump(socket).await;
                    let _ = self.events.send(SyncEvent::Disconnected);
                    if outcome == CloseKind::Normal {
                        self.set_state(ConnectionState::Disconnected).await;
                        log::info!("channel closed for scope {}", self.scope);
                        return;
                    }
                    log::warn!("channel for scope {} closed unexpectedly", self.scope);
                }
                Err(e) => {
                    log::warn!("channel connect to {} failed: {e}", self.channel_url);
                }
            }

            if !self.alive.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected).await;
                return;
            }

            attempt += 1;
            if policy.exhausted(attempt) {
                self.set_state(ConnectionState::Disconnected).await;
                let _ = self.events.send(SyncEvent::SyncLost);
                log::error!(
                    "giving up on scope {} after {} reconnect attempts",
                    self.scope,
                    self.config.max_attempts
                );
                return;
            }

            let delay = policy.delay(attempt);
            self.set_state(ConnectionState::Reconnecting {
                attempt,
                next_delay: delay,
            })
            .await;
            log::info!("reconnect attempt {attempt} in {delay:?}");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => {
                    self.set_state(ConnectionState::Disconnected).await;
                    return;
                }
            }
        }
    }

    /// Pump one open socket until it closes. Heartbeats go out on an
    /// interval (the first tick fires immediately); every inbound text
    /// frame is decoded and dispatched.
    async fn pump(&self, socket: Socket) -> CloseKind {
        let (mut writer, mut reader) = socket.split();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client teardown".into(),
                    };
                    let _ = writer.send(Message::Close(Some(frame))).await;
                    return CloseKind::Normal;
                }
                _ = heartbeat.tick() => {
                    match ChannelMessage::heartbeat().encode() {
                        Ok(text) => {
                            if writer.send(Message::Text(text.into())).await.is_err() {
                                return CloseKind::Abnormal;
                            }
                        }
                        Err(e) => log::error!("failed to encode heartbeat: {e}"),
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
                    Some(Ok(Message::Close(close))) => {
                        let normal = close
                            .as_ref()
                            .map_or(false, |f| f.code == CloseCode::Normal);
                        return if normal { CloseKind::Normal } else { CloseKind::Abnormal };
                    }
                    Some(Ok(Message::Binary(_))) => {
                        log::debug!("ignoring unexpected binary frame");
                    }
                    Some(Ok(_)) => {} // ping/pong handled by the transport
                    Some(Err(e)) => {
                        log::warn!("channel read error: {e}");
                        return CloseKind::Abnormal;
                    }
                    None => return CloseKind::Abnormal,
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        match ChannelMessage::decode(text) {
            Ok(message) => self.dispatch(message).await,
            // One bad frame is discarded; the connection stays up.
            Err(e) => log::warn!("discarding malformed channel message: {e}"),
        }
    }

    async fn dispatch(&self, message: ChannelMessage) {
        match message {
            ChannelMessage::ConnectionEstablished { message } => {
                log::info!(
                    "connection established: {}",
                    message.unwrap_or_else(|| "(no message)".to_string())
                );
            }
            ChannelMessage::HeartbeatAck { .. } => log::trace!("heartbeat acknowledged"),
            ChannelMessage::Heartbeat { .. } => log::trace!("server heartbeat"),
            ChannelMessage::Error { message } => {
                log::warn!(
                    "channel error frame: {}",
                    message.unwrap_or_else(|| "(no message)".to_string())
                );
            }
            data => {
                let Some((event, scope_hint)) = data.into_remote_event() else {
                    return;
                };
                if !event_in_scope(&self.scope, &event, scope_hint.as_deref()) {
                    log::debug!("ignoring out-of-scope event for {}", event.id());
                    return;
                }
                let id = event.id().clone();
                let applied = self.store.lock().await.apply_remote(event);
                let broadcast = match applied {
                    Applied::Created => Some(SyncEvent::RemoteCreated(id)),
                    Applied::Updated => Some(SyncEvent::RemoteUpdated(id)),
                    Applied::Deleted => Some(SyncEvent::RemoteDeleted(id)),
                    Applied::AlreadyPresent | Applied::OrphanDropped => None,
                };
                if let Some(event) = broadcast {
                    let _ = self.events.send(event);
                }
            }
        }
    }

    async fn reload(&self) -> Result<usize, GatewayError> {
        let records = self.gateway.fetch(&self.scope).await?;
        let mut store = self.store.lock().await;
        store.load(records);
        Ok(store.len())
    }
}

/// The sync client for one scope.
///
/// All consumers within a scope share one client — and therefore one
/// connection — through [`crate::subscription::SubscriptionManager`].
pub struct SyncClient {
    scope: Scope,
    channel_url: String,
    config: SyncConfig,
    gateway: Arc<PersistenceGateway>,
    store: Arc<Mutex<AnnotationStore>>,
    state: Arc<RwLock<ConnectionState>>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: Arc<Notify>,
    alive: Arc<AtomicBool>,
    conn_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    pub fn new(
        scope: Scope,
        channel_url: impl Into<String>,
        gateway: PersistenceGateway,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store: Arc::new(Mutex::new(AnnotationStore::new(scope.clone()))),
            scope,
            channel_url: channel_url.into(),
            config,
            gateway: Arc::new(gateway),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            events,
            shutdown: Arc::new(Notify::new()),
            alive: Arc::new(AtomicBool::new(true)),
            conn_task: Mutex::new(None),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Shared handle to the canonical working set. Network events and local
    /// mutations serialize through this one lock; UI consumers take
    /// read-only locks.
    pub fn store(&self) -> Arc<Mutex<AnnotationStore>> {
        Arc::clone(&self.store)
    }

    /// A fresh event subscription. Every subscriber sees every event.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Fetch the scope's working set through the Gateway and replace the
    /// store contents. Initial load, and the degraded-mode manual refresh
    /// once live updates are lost.
    pub async fn load(&self) -> Result<usize, SyncError> {
        let records = self.gateway.fetch(&self.scope).await?;
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        let mut store = self.store.lock().await;
        store.load(records);
        Ok(store.len())
    }

    /// Open the push channel. Spawns the supervising connection task; all
    /// failures from here on surface as state transitions and events, not
    /// errors. Connecting twice is a no-op.
    pub async fn connect(&self) {
        if !self.alive.load(Ordering::SeqCst) {
            log::warn!("connect() on a shut-down client is a no-op");
            return;
        }
        let mut task = self.conn_task.lock().await;
        if task.is_some() {
            log::debug!("channel for {} already running", self.scope);
            return;
        }
        let channel = ChannelTask {
            scope: self.scope.clone(),
            channel_url: self.channel_url.clone(),
            config: self.config.clone(),
            gateway: Arc::clone(&self.gateway),
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            shutdown: Arc::clone(&self.shutdown),
            alive: Arc::clone(&self.alive),
        };
        *task = Some(tokio::spawn(channel.run()));
    }

    /// Explicit teardown: cancels any pending reconnect timer, closes the
    /// channel with a normal close, and waits for the connection task.
    /// Gateway responses that arrive afterwards are ignored.
    pub async fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
        let task = self.conn_task.lock().await.take();
        match task {
            Some(task) => {
                let _ = task.await;
            }
            None => *self.state.write().await = ConnectionState::Disconnected,
        }
    }

    /// Optimistic create: insert under a temp id, write through the
    /// Gateway, then confirm with the server record — or roll back
    /// synchronously when the write is rejected, so the UI never holds a
    /// record the server refused.
    pub async fn create(&self, draft: AnnotationDraft) -> Result<AnnotationRecord, SyncError> {
        let temp = {
            let mut store = self.store.lock().await;
            store.create(draft.clone())?
        };
        match self.gateway.create(&draft).await {
            Ok(server_record) => {
                if !self.alive.load(Ordering::SeqCst) {
                    return Err(SyncError::Closed);
                }
                let confirmed = self.store.lock().await.confirm(&temp.id, server_record)?;
                Ok(confirmed)
            }
            Err(e) => {
                if self.alive.load(Ordering::SeqCst) {
                    let _ = self.store.lock().await.rollback(&temp.id);
                }
                Err(SyncError::WriteRejected(e))
            }
        }
    }

    /// Optimistic author edit: patch locally, write through the Gateway,
    /// restore the pre-edit snapshot when rejected.
    pub async fn update(
        &self,
        id: &AnnotationId,
        patch: AnnotationPatch,
    ) -> Result<AnnotationRecord, SyncError> {
        let (canonical, snapshot) = {
            let mut store = self.store.lock().await;
            let snapshot = store
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::UnknownId(id.clone()))?;
            let canonical = snapshot.id.clone();
            store.update(&canonical, &patch)?;
            (canonical, snapshot)
        };
        match self.gateway.update(&canonical, &patch).await {
            Ok(server_record) => {
                if !self.alive.load(Ordering::SeqCst) {
                    return Err(SyncError::Closed);
                }
                self.store
                    .lock()
                    .await
                    .apply_remote(RemoteEvent::Updated(server_record.clone()));
                Ok(server_record)
            }
            Err(e) => {
                if self.alive.load(Ordering::SeqCst) {
                    self.store.lock().await.restore(snapshot);
                }
                Err(SyncError::WriteRejected(e))
            }
        }
    }

    /// Optimistic delete: remove locally, write through the Gateway,
    /// restore the removed record when rejected.
    pub async fn delete(&self, id: &AnnotationId) -> Result<(), SyncError> {
        let removed = {
            let mut store = self.store.lock().await;
            store.remove(id)?
        };
        match self.gateway.delete(&removed.id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.alive.load(Ordering::SeqCst) {
                    self.store.lock().await.restore(removed);
                }
                Err(SyncError::WriteRejected(e))
            }
        }
    }
}
