//! Presentation surface seam

use crate::media_sink::MediaSink;
use std::sync::Arc;
use thiserror::Error;

/// Playback was refused by the surface, e.g. an autoplay restriction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Playback refused: {0}")]
pub struct PlaybackError(pub String);

/// Where the merged media is presented and user-visible errors are shown
#[cfg_attr(test, mockall::automock)]
pub trait PresentationSurface: Send + Sync {
    fn attach_sink(&self, sink: Arc<MediaSink>);

    fn detach_sink(&self);

    fn play(&self) -> Result<(), PlaybackError>;

    fn show_error(&self, message: &str);
}

/// User intent raised by a surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceIntent {
    Start,
    Stop,
    Talk(String),
}
