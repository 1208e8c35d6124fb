//! Track aggregation
//!
//! Bridges room track events into the shared [`MediaSink`]. Only audio and
//! video tracks are accepted. The first accepted unit attaches the sink to the
//! presentation surface and starts playback.

use crate::media_sink::MediaSink;
use crate::surface::PresentationSurface;
use crate::transport::{RemoteTrack, RoomEvent};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct TrackAggregator {
    sink: Arc<MediaSink>,
    surface: Arc<dyn PresentationSurface>,
}

impl TrackAggregator {
    pub fn new(sink: Arc<MediaSink>, surface: Arc<dyn PresentationSurface>) -> Self {
        Self { sink, surface }
    }

    /// Returns true if the unit was added to the sink
    pub fn on_track_subscribed(&self, track: &RemoteTrack) -> bool {
        if !track.kind.is_media() {
            debug!("Ignoring {:?} track {}", track.kind, track.sid);
            return false;
        }
        let Some(media) = track.media.clone() else {
            debug!("Track {} has no media unit", track.sid);
            return false;
        };

        if !self.sink.add_if_absent(media) {
            return false;
        }
        debug!("Added {:?} track {} to sink", track.kind, track.sid);

        if self.sink.mark_attached() {
            self.surface.attach_sink(Arc::clone(&self.sink));
            // Autoplay may be refused; a later user gesture retries it
            if let Err(e) = self.surface.play() {
                debug!("{}", e);
            }
        }
        true
    }

    /// Returns true if a unit was removed from the sink
    pub fn on_track_unsubscribed(&self, track: &RemoteTrack) -> bool {
        let Some(media) = track.media.as_ref() else {
            return false;
        };
        let removed = self.sink.remove_if_present(media.id()).is_some();
        if removed {
            debug!("Removed track {} from sink", track.sid);
        }
        removed
    }

    /// Apply one event; returns the reason when the room reports loss
    pub fn handle_event(&self, event: RoomEvent) -> Option<String> {
        match event {
            RoomEvent::TrackSubscribed(track) => {
                self.on_track_subscribed(&track);
                None
            }
            RoomEvent::TrackUnsubscribed(track) => {
                self.on_track_unsubscribed(&track);
                None
            }
            RoomEvent::Disconnected { reason } => Some(reason),
        }
    }

    /// Pump room events into the sink until the channel closes or the room
    /// reports loss, in which case `on_disconnect` runs once
    pub fn spawn<F>(self, mut events: broadcast::Receiver<RoomEvent>, on_disconnect: F) -> JoinHandle<()>
    where
        F: FnOnce(String) + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(reason) = self.handle_event(event) {
                            on_disconnect(reason);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Track event pump lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Track event pump finished");
        })
    }
}
