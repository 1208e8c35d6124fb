//! Merged media sink
//!
//! One sink lives for the whole lifetime of the presentation surface. Tracks
//! are added and removed in place so the surface sees incremental updates.
//! Every mutation is a short critical section that never suspends, and the
//! add/remove operations are idempotent so event delivery order does not
//! matter.

use crate::transport::MediaTrack;
use parking_lot::Mutex;

/// Container aggregating accepted audio/video units
#[derive(Debug, Default)]
pub struct MediaSink {
    inner: Mutex<SinkState>,
}

#[derive(Debug, Default)]
struct SinkState {
    tracks: Vec<MediaTrack>,
    attached: bool,
}

impl MediaSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit unless one with the same id is already present
    pub fn add_if_absent(&self, track: MediaTrack) -> bool {
        let mut state = self.inner.lock();
        if state.tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        state.tracks.push(track);
        true
    }

    /// Remove the unit with `id`; removing an absent unit is a no-op
    pub fn remove_if_present(&self, id: &str) -> Option<MediaTrack> {
        let mut state = self.inner.lock();
        let index = state.tracks.iter().position(|t| t.id() == id)?;
        Some(state.tracks.remove(index))
    }

    /// Stop every unit and empty the sink, returning how many were stopped
    pub fn stop_all(&self) -> usize {
        let drained: Vec<MediaTrack> = std::mem::take(&mut self.inner.lock().tracks);
        for track in &drained {
            track.stop();
        }
        drained.len()
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.inner.lock().tracks.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().tracks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().tracks.iter().any(|t| t.id() == id)
    }

    /// Record attachment to the surface; true only for the first call since
    /// the last [`mark_detached`](Self::mark_detached)
    pub fn mark_attached(&self) -> bool {
        let mut state = self.inner.lock();
        !std::mem::replace(&mut state.attached, true)
    }

    /// Clear the attachment flag; true if the sink was attached
    pub fn mark_detached(&self) -> bool {
        std::mem::replace(&mut self.inner.lock().attached, false)
    }
}
