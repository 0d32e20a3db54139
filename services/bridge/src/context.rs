//! Process-wide bridge context.
//!
//! Owns the inbound store and the receiver listeners. One context is built
//! per process and shared by handle; receivers are started on first use and
//! stay up until the process exits.

use crate::config::{Config, ReceiverConfig};
use crate::error::{BridgeError, Result};
use crate::receiver::create_router;
use crate::selector;
use crate::store::InboundStore;
use crate::tensor::{Selection, PLACEHOLDER_SIZE};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Lifecycle of the receiver bound to one port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Listening { addr: SocketAddr },
}

/// Shared state of the bridge process
pub struct BridgeContext {
    store: Arc<InboundStore>,
    receiver_config: ReceiverConfig,
    placeholder_size: u32,
    /// Per-port listener state. The lock is held for the whole start
    /// sequence so concurrent callers observe either `Listening` or wait.
    listeners: Arc<Mutex<HashMap<u16, ListenerState>>>,
}

impl BridgeContext {
    pub fn new(store: Arc<InboundStore>, receiver_config: ReceiverConfig) -> Self {
        Self {
            store,
            receiver_config,
            placeholder_size: PLACEHOLDER_SIZE,
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build the context described by the service configuration
    pub fn from_config(config: &Config) -> Self {
        let store = Arc::new(InboundStore::new(config.store.max_images));
        let mut context = Self::new(store, config.receiver.clone());
        context.placeholder_size = config.selector.placeholder_size;
        context
    }

    pub fn store(&self) -> &Arc<InboundStore> {
        &self.store
    }

    pub fn receiver_config(&self) -> &ReceiverConfig {
        &self.receiver_config
    }

    /// Current state of the listener for `port`
    pub async fn listener_state(&self, port: u16) -> ListenerState {
        self.listeners
            .lock()
            .await
            .get(&port)
            .copied()
            .unwrap_or(ListenerState::Stopped)
    }

    /// Start the receiver on `port` unless it is already listening.
    ///
    /// Returns the bound address. Safe to call any number of times, from any
    /// number of tasks: only the first call binds. A failed bind leaves the
    /// port `Stopped` so a later call can retry.
    pub async fn ensure_receiver_running(&self, port: u16) -> Result<SocketAddr> {
        let mut listeners = self.listeners.lock().await;

        if let Some(ListenerState::Listening { addr }) = listeners.get(&port) {
            debug!(port, addr = %addr, "Receiver already listening");
            return Ok(*addr);
        }

        listeners.insert(port, ListenerState::Starting);

        let bind_addr = format!("{}:{}", self.receiver_config.host, port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                listeners.insert(port, ListenerState::Stopped);
                error!(address = %bind_addr, error = %e, "Failed to bind receiver");
                return Err(BridgeError::Bind {
                    addr: bind_addr,
                    reason: e.to_string(),
                });
            }
        };

        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                listeners.insert(port, ListenerState::Stopped);
                return Err(BridgeError::Bind {
                    addr: bind_addr,
                    reason: e.to_string(),
                });
            }
        };

        let router = create_router(self.store.clone(), &self.receiver_config);
        let registry = self.listeners.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(address = %addr, error = %e, "Receiver server error");
            }
            release_listener(&registry, port, addr).await;
        });

        listeners.insert(port, ListenerState::Listening { addr });
        info!(port, address = %addr, "Receiver started");

        Ok(addr)
    }

    /// Make sure the receiver is up, then select the newest received image
    pub async fn load_latest(&self, port: u16) -> Result<Selection> {
        self.ensure_receiver_running(port).await?;
        Ok(selector::select_latest(&self.store, self.placeholder_size))
    }
}

/// Mark `port` as stopped once the server bound to `addr` has exited.
///
/// A port that has since been rebound to another address is left alone.
async fn release_listener(
    listeners: &Mutex<HashMap<u16, ListenerState>>,
    port: u16,
    addr: SocketAddr,
) {
    let mut listeners = listeners.lock().await;
    if listeners.get(&port) == Some(&ListenerState::Listening { addr }) {
        listeners.insert(port, ListenerState::Stopped);
        warn!(port, address = %addr, "Receiver stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_support::solid_rgba;

    fn local_context() -> Arc<BridgeContext> {
        let config = ReceiverConfig {
            host: "127.0.0.1".to_string(),
            ..ReceiverConfig::default()
        };
        Arc::new(BridgeContext::new(Arc::new(InboundStore::unbounded()), config))
    }

    #[tokio::test]
    async fn test_initial_state_is_stopped() {
        let context = local_context();
        assert_eq!(context.listener_state(0).await, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_repeated_start_reuses_listener() {
        let context = local_context();
        let first = context.ensure_receiver_running(0).await.unwrap();
        let second = context.ensure_receiver_running(0).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            context.listener_state(0).await,
            ListenerState::Listening { addr: first }
        );
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_port_stopped() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let context = local_context();
        let result = context.ensure_receiver_running(port).await;
        assert!(matches!(result, Err(BridgeError::Bind { .. })));
        assert_eq!(context.listener_state(port).await, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_load_latest_splits_newest_image() {
        let context = local_context();
        let (image, mask) = context.load_latest(0).await.unwrap();
        assert_eq!((image.width, image.height), (64, 64));
        assert!(mask.is_all_zero());

        context.store().insert(solid_rgba(2, 2, [0, 0, 0, 255]), "layer");
        let (image, mask) = context.load_latest(0).await.unwrap();
        assert_eq!((image.width, image.height), (2, 2));
        assert!(mask.data.iter().all(|v| *v == 1.0));
    }

    #[tokio::test]
    async fn test_exited_server_releases_port() {
        let context = local_context();
        let first = context.ensure_receiver_running(0).await.unwrap();

        release_listener(&context.listeners, 0, first).await;
        assert_eq!(context.listener_state(0).await, ListenerState::Stopped);

        let second = context.ensure_receiver_running(0).await.unwrap();
        assert_eq!(
            context.listener_state(0).await,
            ListenerState::Listening { addr: second }
        );
    }

    #[tokio::test]
    async fn test_stale_release_keeps_current_listener() {
        let context = local_context();
        let addr = context.ensure_receiver_running(0).await.unwrap();
        let stale: SocketAddr = "127.0.0.1:1".parse().unwrap();

        release_listener(&context.listeners, 0, stale).await;
        assert_eq!(
            context.listener_state(0).await,
            ListenerState::Listening { addr }
        );
    }
}
