//! Reference-counted channel subscriptions.
//!
//! Multiple logical consumers of one scope — a document view and a notes
//! panel open at the same time — must multiplex over a single push-channel
//! connection: duplicate sockets mean duplicate event delivery and duplicate
//! reconnect storms. The manager keys one [`SyncClient`] per scope, opens it
//! on the first subscriber, shares it with every later subscriber, and shuts
//! it down when the last handle is closed. Never a bare global socket.

use std::collections::HashMap;
use std::sync::Arc;

use glossa_core::Scope;
use tokio::sync::{broadcast, Mutex};

use crate::client::{SyncClient, SyncConfig, SyncEvent, SyncError};
use crate::gateway::{GatewayConfig, PersistenceGateway};

struct ChannelEntry {
    client: Arc<SyncClient>,
    subscribers: usize,
}

type ChannelMap = Arc<Mutex<HashMap<String, ChannelEntry>>>;

/// One manager per server endpoint; hands out shared per-scope clients.
pub struct SubscriptionManager {
    channel_url: String,
    gateway_config: GatewayConfig,
    sync_config: SyncConfig,
    channels: ChannelMap,
}

impl SubscriptionManager {
    pub fn new(
        channel_url: impl Into<String>,
        gateway_config: GatewayConfig,
        sync_config: SyncConfig,
    ) -> Self {
        Self {
            channel_url: channel_url.into(),
            gateway_config,
            sync_config,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a scope. The first subscriber performs the initial
    /// Gateway load and opens the channel; later subscribers share the same
    /// client. Fails when the initial load fails — nothing is registered in
    /// that case, so a retry starts clean.
    pub async fn subscribe(&self, scope: Scope) -> Result<SubscriptionHandle, SyncError> {
        let key = scope.key();
        let mut channels = self.channels.lock().await;

        if let Some(entry) = channels.get_mut(&key) {
            entry.subscribers += 1;
            log::debug!("scope {key}: {} subscribers share one channel", entry.subscribers);
            return Ok(SubscriptionHandle {
                key,
                client: Arc::clone(&entry.client),
                channels: Arc::clone(&self.channels),
                released: false,
            });
        }

        let gateway = PersistenceGateway::new(self.gateway_config.clone())?;
        let client = Arc::new(SyncClient::new(
            scope,
            &self.channel_url,
            gateway,
            self.sync_config.clone(),
        ));
        let loaded = client.load().await?;
        client.connect().await;
        log::info!("scope {key}: channel opened, {loaded} records loaded");

        channels.insert(
            key.clone(),
            ChannelEntry {
                client: Arc::clone(&client),
                subscribers: 1,
            },
        );
        Ok(SubscriptionHandle {
            key,
            client,
            channels: Arc::clone(&self.channels),
            released: false,
        })
    }

    /// Scopes with at least one live subscriber.
    pub async fn active_channels(&self) -> usize {
        self.channels.lock().await.len()
    }

    /// Subscriber count for a scope, zero when no channel is open.
    pub async fn subscriber_count(&self, scope: &Scope) -> usize {
        self.channels
            .lock()
            .await
            .get(&scope.key())
            .map_or(0, |entry| entry.subscribers)
    }
}

/// One consumer's claim on a scope's shared channel. Must be released with
/// [`SubscriptionHandle::close`]; the underlying connection closes when the
/// last handle for its scope is released.
pub struct SubscriptionHandle {
    key: String,
    client: Arc<SyncClient>,
    channels: ChannelMap,
    released: bool,
}

impl SubscriptionHandle {
    pub fn client(&self) -> &Arc<SyncClient> {
        &self.client
    }

    /// A fresh event subscription on the shared channel.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.client.events()
    }

    /// Release this claim. The last release for a scope tears the channel
    /// down (normal close, reconnect timers cancelled).
    pub async fn close(mut self) {
        self.released = true;
        let client = {
            let mut channels = self.channels.lock().await;
            let Some(entry) = channels.get_mut(&self.key) else {
                return;
            };
            entry.subscribers -= 1;
            if entry.subscribers > 0 {
                log::debug!("scope {}: {} subscribers remain", self.key, entry.subscribers);
                return;
            }
            channels.remove(&self.key).map(|entry| entry.client)
        };
        if let Some(client) = client {
            log::info!("scope {}: last subscriber left, closing channel", self.key);
            client.shutdown().await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if !self.released {
            // Teardown needs the async close(); a bare drop leaks the claim.
            log::warn!(
                "subscription handle for {} dropped without close()",
                self.key
            );
        }
    }
}
