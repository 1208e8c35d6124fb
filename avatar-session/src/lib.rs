//! avatar-session: live talking-avatar session lifecycle
//!
//! Drives one remote avatar streaming session end to end:
//! - Control-plane calls against the streaming API (token, create, start, task, stop)
//! - Joining the real-time room the avatar publishes into
//! - Aggregating subscribed audio/video tracks into one media sink
//! - A lifecycle controller that keeps local state consistent with the remote session

pub mod error;
pub mod config;
pub mod types;
pub mod control_plane;
pub mod transport;
pub mod media_sink;
pub mod surface;
pub mod track_aggregator;
pub mod controller;

pub use error::SessionError;
pub use config::SessionConfig;
pub use types::{
    IgnoreReason, Outcome, SessionDescriptor, SessionSnapshot, SessionState, SessionToken,
    TalkRequest, TaskType,
};
pub use control_plane::{ControlPlane, StreamingApiClient};
pub use transport::{
    MediaTrack, RemoteTrack, RoomConnection, RoomConnector, RoomEvent, RoomHandle, TrackKind,
};
pub use media_sink::MediaSink;
pub use surface::{PlaybackError, PresentationSurface, SurfaceIntent};
pub use track_aggregator::TrackAggregator;
pub use controller::{ControllerTimeouts, SessionController};
