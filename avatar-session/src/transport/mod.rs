//! Real-time transport seam
//!
//! The room connection that carries the avatar's audio and video is an
//! external collaborator. The controller only needs to connect, observe track
//! subscription events, and disconnect.

pub mod loopback;
pub mod signal;

pub use loopback::{LoopbackConnection, LoopbackConnector};
pub use signal::SignalConnector;

use crate::error::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the per-connection room event channel
pub const EVENT_BUFFER_SIZE: usize = 256;

/// Kind of a published track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    Data,
}

impl TrackKind {
    /// Whether tracks of this kind belong in the media sink
    pub fn is_media(&self) -> bool {
        matches!(self, TrackKind::Audio | TrackKind::Video)
    }
}

/// Handle to one underlying media unit.
///
/// Clones share the same stop flag, so stopping any clone stops the unit.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<MediaTrackInner>,
}

struct MediaTrackInner {
    id: String,
    kind: TrackKind,
    stopped: AtomicBool,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(MediaTrackInner {
                id: id.into(),
                kind,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    /// Stop the unit; stopping twice is harmless
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A track as reported by the room
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub sid: String,
    pub kind: TrackKind,
    /// Underlying media unit; absent when the transport has already released it
    pub media: Option<MediaTrack>,
}

impl RemoteTrack {
    /// Track with a fresh media unit using the track sid as its id
    pub fn new(sid: impl Into<String>, kind: TrackKind) -> Self {
        let sid = sid.into();
        Self {
            media: Some(MediaTrack::new(sid.clone(), kind)),
            sid,
            kind,
        }
    }
}

/// Events delivered by a room connection
#[derive(Debug, Clone)]
pub enum RoomEvent {
    TrackSubscribed(RemoteTrack),
    TrackUnsubscribed(RemoteTrack),
    /// The connection was lost without a local disconnect
    Disconnected { reason: String },
}

/// Live room connection
#[async_trait]
pub trait RoomConnection: Send + Sync {
    fn room_url(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Leave the room; calling it more than once is a no-op
    async fn disconnect(&self);
}

/// A freshly joined room and its event subscription.
///
/// The receiver is created before `connect` returns so no event published
/// afterwards can be missed.
pub struct RoomHandle {
    pub connection: Arc<dyn RoomConnection>,
    pub events: broadcast::Receiver<RoomEvent>,
}

/// Factory for room connections
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(&self, url: &str, access_token: &str) -> Result<RoomHandle, SessionError>;
}
