//! In-process room transport
//!
//! Used for offline runs and tests: connections are plain broadcast channels
//! and track events are injected with [`LoopbackConnection::publish`].

use crate::error::SessionError;
use crate::transport::{RoomConnection, RoomConnector, RoomEvent, RoomHandle, EVENT_BUFFER_SIZE};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Connector that joins in-process rooms
#[derive(Default)]
pub struct LoopbackConnector {
    state: Mutex<LoopbackState>,
}

#[derive(Default)]
struct LoopbackState {
    fail_next: Option<String>,
    lose_next: Option<String>,
    connect_delay: Option<Duration>,
    connects: Vec<(String, String)>,
    connections: Vec<Arc<LoopbackConnection>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` fail with a transport error
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.state.lock().fail_next = Some(reason.into());
    }

    /// Make the next `connect` succeed with a loss already queued on its
    /// event stream while the connection still reports itself connected
    pub fn lose_next(&self, reason: impl Into<String>) {
        self.state.lock().lose_next = Some(reason.into());
    }

    /// Delay every `connect` by `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Number of `connect` calls, failed ones included
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    /// `(url, access_token)` of every `connect` call
    pub fn connect_calls(&self) -> Vec<(String, String)> {
        self.state.lock().connects.clone()
    }

    /// Most recently opened connection
    pub fn last_connection(&self) -> Option<Arc<LoopbackConnection>> {
        self.state.lock().connections.last().cloned()
    }

    /// Connections currently joined
    pub fn open_connections(&self) -> usize {
        self.state
            .lock()
            .connections
            .iter()
            .filter(|c| c.is_connected())
            .count()
    }
}

#[async_trait]
impl RoomConnector for LoopbackConnector {
    async fn connect(&self, url: &str, access_token: &str) -> Result<RoomHandle, SessionError> {
        let delay = {
            let mut state = self.state.lock();
            state.connects.push((url.to_string(), access_token.to_string()));
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next.take() {
            return Err(SessionError::Transport(reason));
        }

        let (sender, events) = broadcast::channel(EVENT_BUFFER_SIZE);
        let connection = Arc::new(LoopbackConnection {
            url: url.to_string(),
            sender,
            connected: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
        });
        state.connections.push(Arc::clone(&connection));
        debug!("Loopback room joined: {}", url);
        if let Some(reason) = state.lose_next.take() {
            let _ = connection.sender.send(RoomEvent::Disconnected { reason });
        }

        Ok(RoomHandle {
            connection,
            events,
        })
    }
}

/// In-process room connection
pub struct LoopbackConnection {
    url: String,
    sender: broadcast::Sender<RoomEvent>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
}

impl LoopbackConnection {
    /// Deliver an event to subscribers; returns false once disconnected
    pub fn publish(&self, event: RoomEvent) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.sender.send(event).is_ok()
    }

    /// Simulate the remote side dropping the connection
    pub fn drop_remote(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let _ = self.sender.send(RoomEvent::Disconnected { reason });
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Number of local `disconnect` calls
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomConnection for LoopbackConnection {
    fn room_url(&self) -> &str {
        &self.url
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("Loopback room left: {}", self.url);
        }
    }
}
