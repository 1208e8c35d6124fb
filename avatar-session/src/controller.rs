//! Session lifecycle controller
//!
//! Orchestrates the control plane and the room transport into one
//! start → talk → stop protocol:
//!
//! ```text
//! Idle --start()--> Starting --ok--> Active --stop()--> Stopping --> Idle
//!                      \--err--> Idle
//! ```
//!
//! State lives behind a mutex that is never held across an await, so every
//! transition between suspension points is atomic with respect to other
//! controller calls. While `Starting`, the partially built session lives only
//! in the start future; rolling back means dropping it.

use crate::config::SessionConfig;
use crate::control_plane::ControlPlane;
use crate::error::SessionError;
use crate::media_sink::MediaSink;
use crate::surface::{PresentationSurface, SurfaceIntent};
use crate::track_aggregator::TrackAggregator;
use crate::transport::{RoomConnection, RoomConnector, RoomEvent};
use crate::types::{
    IgnoreReason, Outcome, SessionDescriptor, SessionSnapshot, SessionState, SessionToken,
    TalkRequest, TaskType,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bounds on the calls the controller makes outside the HTTP client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTimeouts {
    /// Joining the room
    pub connect: Duration,
    /// Best-effort stream stop during teardown
    pub stop: Duration,
}

impl Default for ControllerTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            stop: Duration::from_secs(10),
        }
    }
}

impl ControllerTimeouts {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            stop: config.stop_timeout(),
        }
    }
}

/// Everything that exists only while a session is active. Token, descriptor
/// and connection are created and dropped together.
struct ActiveSession {
    generation: u64,
    token: SessionToken,
    descriptor: SessionDescriptor,
    connection: Arc<dyn RoomConnection>,
    pump: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

enum Phase {
    Idle,
    Starting,
    Active(ActiveSession),
    Stopping,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Starting => SessionState::Starting,
            Phase::Active(_) => SessionState::Active,
            Phase::Stopping => SessionState::Stopping,
        }
    }
}

struct ControllerState {
    phase: Phase,
    generation: u64,
    /// Room loss reported while its session was still starting
    lost_while_starting: Option<(u64, String)>,
    shut_down: bool,
}

/// How a finished start sequence is committed
enum Commit {
    Active,
    ShutDown(ActiveSession),
    Lost(ActiveSession, String),
}

/// Drives a single avatar session for one presentation surface
pub struct SessionController {
    control_plane: Arc<dyn ControlPlane>,
    connector: Arc<dyn RoomConnector>,
    surface: Arc<dyn PresentationSurface>,
    sink: Arc<MediaSink>,
    avatar_id: String,
    timeouts: ControllerTimeouts,
    state: Mutex<ControllerState>,
    this: Weak<SessionController>,
}

impl SessionController {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        connector: Arc<dyn RoomConnector>,
        surface: Arc<dyn PresentationSurface>,
        avatar_id: impl Into<String>,
        timeouts: ControllerTimeouts,
    ) -> Arc<Self> {
        let avatar_id = avatar_id.into();
        Arc::new_cyclic(|this| Self {
            control_plane,
            connector,
            surface,
            sink: Arc::new(MediaSink::new()),
            avatar_id,
            timeouts,
            state: Mutex::new(ControllerState {
                phase: Phase::Idle,
                generation: 0,
                lost_while_starting: None,
                shut_down: false,
            }),
            this: this.clone(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().phase.state()
    }

    /// Descriptor of the active session
    pub fn descriptor(&self) -> Option<SessionDescriptor> {
        match &self.state.lock().phase {
            Phase::Active(session) => Some(session.descriptor.clone()),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (state, active) = {
            let state = self.state.lock();
            let active = match &state.phase {
                Phase::Active(session) => Some((
                    session.descriptor.session_id.clone(),
                    session.descriptor.transport_url.clone(),
                    session.started_at,
                )),
                _ => None,
            };
            (state.phase.state(), active)
        };
        let (session_id, transport_url, started_at) = match active {
            Some((id, url, at)) => (Some(id), Some(url), Some(at)),
            None => (None, None, None),
        };
        SessionSnapshot {
            state,
            session_id,
            transport_url,
            started_at,
            track_count: self.sink.len(),
        }
    }

    /// The merged media sink shared with the surface
    pub fn sink(&self) -> Arc<MediaSink> {
        Arc::clone(&self.sink)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Dispatch a surface intent
    pub async fn handle_intent(&self, intent: SurfaceIntent) -> Result<Outcome, SessionError> {
        match intent {
            SurfaceIntent::Start => self.start().await,
            SurfaceIntent::Stop => Ok(self.stop().await),
            SurfaceIntent::Talk(text) => self.talk(&text).await,
        }
    }

    /// Negotiate a session and join its room.
    ///
    /// Ignored unless `Idle`. On failure the error is shown on the surface,
    /// all partial state is dropped and the controller returns to `Idle`.
    pub async fn start(&self) -> Result<Outcome, SessionError> {
        let generation = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Ok(Outcome::Ignored(IgnoreReason::ShutDown));
            }
            match state.phase {
                Phase::Idle => {}
                Phase::Starting => return Ok(Outcome::Ignored(IgnoreReason::AlreadyStarting)),
                Phase::Active(_) => return Ok(Outcome::Ignored(IgnoreReason::AlreadyActive)),
                Phase::Stopping => return Ok(Outcome::Ignored(IgnoreReason::Stopping)),
            }
            state.generation += 1;
            state.phase = Phase::Starting;
            state.lost_while_starting = None;
            state.generation
        };

        info!("Starting avatar session for {}", self.avatar_id);
        match self.establish(generation).await {
            Ok(session) => match self.commit(session) {
                Commit::Active => Ok(Outcome::Applied),
                Commit::ShutDown(session) => {
                    debug!("Controller shut down during start, leaving room");
                    self.teardown(session).await;
                    Ok(Outcome::Ignored(IgnoreReason::ShutDown))
                }
                Commit::Lost(session, reason) => {
                    // The phase stays Starting until the room is gone
                    self.release_remote(&session.token, &session.descriptor.session_id)
                        .await;
                    self.teardown(session).await;
                    let e = SessionError::Transport(format!(
                        "Room connection lost during start: {}",
                        reason
                    ));
                    self.fail_start(&e);
                    Err(e)
                }
            },
            Err(e) => {
                self.fail_start(&e);
                Err(e)
            }
        }
    }

    fn commit(&self, session: ActiveSession) -> Commit {
        let mut state = self.state.lock();
        if state.shut_down {
            state.phase = Phase::Idle;
            return Commit::ShutDown(session);
        }
        match state.lost_while_starting.take() {
            Some((generation, reason)) if generation == session.generation => {
                Commit::Lost(session, reason)
            }
            _ => {
                info!(
                    "Session {} active in {}",
                    session.descriptor.session_id, session.descriptor.transport_url
                );
                state.phase = Phase::Active(session);
                Commit::Active
            }
        }
    }

    fn fail_start(&self, e: &SessionError) {
        let shut_down = {
            let mut state = self.state.lock();
            state.phase = Phase::Idle;
            state.lost_while_starting = None;
            state.shut_down
        };
        error!(kind = e.kind(), "Start failed: {}", e);
        if !shut_down {
            self.surface.show_error(&format!("Start failed: {}", e));
        }
    }

    /// Leave the active session. A no-op unless `Active`.
    pub async fn stop(&self) -> Outcome {
        self.stop_session(None).await
    }

    /// Have the avatar respond to `text`
    pub async fn talk(&self, text: &str) -> Result<Outcome, SessionError> {
        self.say(text, TaskType::Talk).await
    }

    /// Dispatch `text` to the active session.
    ///
    /// Blank text and calls without an active session are ignored without a
    /// network call. A failed dispatch is shown on the surface and leaves the
    /// session active.
    pub async fn say(&self, text: &str, task_type: TaskType) -> Result<Outcome, SessionError> {
        let Some(request) = TalkRequest::new(text, task_type) else {
            return Ok(Outcome::Ignored(IgnoreReason::EmptyText));
        };

        let active = {
            let state = self.state.lock();
            match &state.phase {
                Phase::Active(session) => Some((session.token.clone(), session.descriptor.session_id.clone())),
                _ => None,
            }
        };
        let Some((token, session_id)) = active else {
            return Ok(Outcome::Ignored(IgnoreReason::NotActive));
        };

        debug!("Sending {} task to session {}", request.task_type, session_id);
        match self
            .control_plane
            .send_task(&token, &session_id, &request.text, request.task_type)
            .await
        {
            Ok(()) => Ok(Outcome::Applied),
            Err(e) => {
                warn!(kind = e.kind(), "Send failed: {}", e);
                self.surface.show_error(&format!("Send failed: {}", e));
                Err(e)
            }
        }
    }

    /// Tear everything down when the surface goes away.
    ///
    /// Disconnects the room and stops all media without the network stop
    /// call. The sink is cleared even when no session was active, and later
    /// `start()` calls are refused.
    pub async fn shutdown(&self) {
        let session = {
            let mut state = self.state.lock();
            state.shut_down = true;
            if matches!(state.phase, Phase::Active(_)) {
                match std::mem::replace(&mut state.phase, Phase::Idle) {
                    Phase::Active(session) => Some(session),
                    _ => None,
                }
            } else {
                None
            }
        };

        match session {
            Some(session) => {
                info!("Shutting down session {}", session.descriptor.session_id);
                self.teardown(session).await;
            }
            None => {
                debug!("Shutting down controller with no active session");
                self.release_media();
            }
        }
    }

    async fn establish(&self, generation: u64) -> Result<ActiveSession, SessionError> {
        let token = self.control_plane.issue_token().await?;

        let descriptor = self.control_plane.create_session(&token, &self.avatar_id).await?;
        info!("Session {} created", descriptor.session_id);

        // From here on a remote session exists and must be released on failure
        match self.join_room(&token, &descriptor, generation).await {
            Ok((connection, pump)) => Ok(ActiveSession {
                generation,
                token,
                descriptor,
                connection,
                pump,
                started_at: Utc::now(),
            }),
            Err(e) => {
                self.release_remote(&token, &descriptor.session_id).await;
                Err(e)
            }
        }
    }

    async fn join_room(
        &self,
        token: &SessionToken,
        descriptor: &SessionDescriptor,
        generation: u64,
    ) -> Result<(Arc<dyn RoomConnection>, JoinHandle<()>), SessionError> {
        self.control_plane.start_stream(token, &descriptor.session_id).await?;
        debug!("Stream started for session {}", descriptor.session_id);

        let handle = tokio::time::timeout(
            self.timeouts.connect,
            self.connector
                .connect(&descriptor.transport_url, &descriptor.transport_access_token),
        )
        .await
        .map_err(|_| SessionError::Transport("Room connection timed out".to_string()))??;

        let pump = self.spawn_pump(handle.events, generation);
        if !handle.connection.is_connected() {
            self.discard_room(handle.connection.as_ref(), pump).await;
            return Err(SessionError::Transport(
                "Room connection lost during start".to_string(),
            ));
        }
        Ok((handle.connection, pump))
    }

    fn spawn_pump(&self, events: broadcast::Receiver<RoomEvent>, generation: u64) -> JoinHandle<()> {
        let aggregator = TrackAggregator::new(Arc::clone(&self.sink), Arc::clone(&self.surface));
        let controller = self.this.clone();
        aggregator.spawn(events, move |reason| {
            if let Some(controller) = controller.upgrade() {
                tokio::spawn(async move {
                    controller.on_connection_lost(generation, reason).await;
                });
            }
        })
    }

    async fn on_connection_lost(&self, generation: u64, reason: String) {
        let current = {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Starting) && state.generation == generation {
                debug!("Room lost before session generation {} became active", generation);
                state.lost_while_starting = Some((generation, reason));
                return;
            }
            matches!(&state.phase, Phase::Active(session) if session.generation == generation)
        };
        if !current {
            debug!("Ignoring connection loss for stale session generation {}", generation);
            return;
        }

        warn!("Connection lost: {}", reason);
        self.surface.show_error(&format!("Connection lost: {}", reason));
        self.stop_session(Some(generation)).await;
    }

    /// Stop the active session, or only the one with `generation` when given
    async fn stop_session(&self, generation: Option<u64>) -> Outcome {
        let session = {
            let mut state = self.state.lock();
            let matching = matches!(
                &state.phase,
                Phase::Active(session) if generation.map_or(true, |g| g == session.generation)
            );
            if !matching {
                return Outcome::Ignored(IgnoreReason::NotActive);
            }
            match std::mem::replace(&mut state.phase, Phase::Stopping) {
                Phase::Active(session) => session,
                other => {
                    state.phase = other;
                    return Outcome::Ignored(IgnoreReason::NotActive);
                }
            }
        };

        let session_id = session.descriptor.session_id.clone();
        info!("Stopping session {}", session_id);
        self.release_remote(&session.token, &session_id).await;
        self.teardown(session).await;

        self.state.lock().phase = Phase::Idle;
        info!("Session {} stopped", session_id);
        Outcome::Applied
    }

    /// Best-effort remote stop; failures are logged only
    async fn release_remote(&self, token: &SessionToken, session_id: &str) {
        match tokio::time::timeout(
            self.timeouts.stop,
            self.control_plane.stop_stream(token, session_id),
        )
        .await
        {
            Ok(Ok(())) => debug!("Stream stopped for session {}", session_id),
            Ok(Err(e)) => warn!("Stopping stream for session {} failed: {}", session_id, e),
            Err(_) => warn!("Stopping stream for session {} timed out", session_id),
        }
    }

    async fn teardown(&self, session: ActiveSession) {
        self.discard_room(session.connection.as_ref(), session.pump).await;
    }

    async fn discard_room(&self, connection: &dyn RoomConnection, pump: JoinHandle<()>) {
        debug!("Leaving room {}", connection.room_url());
        pump.abort();
        connection.disconnect().await;
        // Wait for the pump so no late track lands in the sink after clearing
        let _ = pump.await;
        self.release_media();
    }

    fn release_media(&self) {
        let stopped = self.sink.stop_all();
        self.sink.mark_detached();
        self.surface.detach_sink();
        debug!("Stopped {} media units", stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::PlaybackError;
    use crate::transport::{LoopbackConnector, RemoteTrack, TrackKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Control plane answering every call successfully
    #[derive(Default)]
    struct FakeControlPlane {
        creates: AtomicUsize,
        tasks: Mutex<Vec<(String, TaskType)>>,
        stops: AtomicUsize,
        fail_start_stream: bool,
        fail_tasks: bool,
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn issue_token(&self) -> Result<SessionToken, SessionError> {
            Ok(SessionToken::new("t1"))
        }

        async fn create_session(
            &self,
            _token: &SessionToken,
            _avatar_id: &str,
        ) -> Result<SessionDescriptor, SessionError> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SessionDescriptor {
                session_id: format!("s{}", n),
                transport_url: "wss://x".to_string(),
                transport_access_token: "a1".to_string(),
                chat_token: None,
            })
        }

        async fn start_stream(&self, _token: &SessionToken, _session_id: &str) -> Result<(), SessionError> {
            if self.fail_start_stream {
                return Err(SessionError::Protocol("streaming.start failed: 500".to_string()));
            }
            Ok(())
        }

        async fn send_task(
            &self,
            _token: &SessionToken,
            _session_id: &str,
            text: &str,
            task_type: TaskType,
        ) -> Result<(), SessionError> {
            self.tasks.lock().push((text.to_string(), task_type));
            if self.fail_tasks {
                return Err(SessionError::Protocol("streaming.task failed: 400".to_string()));
            }
            Ok(())
        }

        async fn stop_stream(&self, _token: &SessionToken, _session_id: &str) -> Result<(), SessionError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSurface {
        errors: Mutex<Vec<String>>,
        attaches: AtomicUsize,
        detaches: AtomicUsize,
    }

    impl PresentationSurface for RecordingSurface {
        fn attach_sink(&self, _sink: Arc<MediaSink>) {
            self.attaches.fetch_add(1, Ordering::SeqCst);
        }

        fn detach_sink(&self) {
            self.detaches.fetch_add(1, Ordering::SeqCst);
        }

        fn play(&self) -> Result<(), PlaybackError> {
            Ok(())
        }

        fn show_error(&self, message: &str) {
            self.errors.lock().push(message.to_string());
        }
    }

    struct Harness {
        controller: Arc<SessionController>,
        control_plane: Arc<FakeControlPlane>,
        connector: Arc<LoopbackConnector>,
        surface: Arc<RecordingSurface>,
    }

    fn harness(control_plane: FakeControlPlane) -> Harness {
        let control_plane = Arc::new(control_plane);
        let connector = Arc::new(LoopbackConnector::new());
        let surface = Arc::new(RecordingSurface::default());
        let controller = SessionController::new(
            control_plane.clone(),
            connector.clone(),
            surface.clone(),
            "avatar-1",
            ControllerTimeouts::default(),
        );
        Harness {
            controller,
            control_plane,
            connector,
            surface,
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_start_reaches_active() {
        let h = harness(FakeControlPlane::default());
        assert_eq!(h.controller.start().await.unwrap(), Outcome::Applied);
        assert_eq!(h.controller.state(), SessionState::Active);

        let descriptor = h.controller.descriptor().unwrap();
        assert_eq!(descriptor.session_id, "s1");
        assert_eq!(h.connector.connect_calls(), vec![("wss://x".to_string(), "a1".to_string())]);
    }

    #[tokio::test]
    async fn test_start_while_active_is_ignored() {
        let h = harness(FakeControlPlane::default());
        h.controller.start().await.unwrap();
        assert_eq!(
            h.controller.start().await.unwrap(),
            Outcome::Ignored(IgnoreReason::AlreadyActive)
        );
        assert_eq!(h.control_plane.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_stream_start_releases_remote_session() {
        let h = harness(FakeControlPlane {
            fail_start_stream: true,
            ..Default::default()
        });
        assert!(h.controller.start().await.is_err());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(h.controller.descriptor().is_none());
        assert_eq!(h.control_plane.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.connector.connect_count(), 0);
        assert!(h.surface.errors.lock()[0].starts_with("Start failed: "));
    }

    #[tokio::test]
    async fn test_failed_connect_rolls_back() {
        let h = harness(FakeControlPlane::default());
        h.connector.fail_next("room unavailable");
        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(err.kind(), "transport");
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(
            h.surface.errors.lock().clone(),
            vec!["Start failed: Transport error: room unavailable".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stop_tears_everything_down() {
        let h = harness(FakeControlPlane::default());
        h.controller.start().await.unwrap();
        let connection = h.connector.last_connection().unwrap();
        let video = RemoteTrack::new("v", TrackKind::Video);
        let media = video.media.clone().unwrap();
        connection.publish(RoomEvent::TrackSubscribed(video));
        wait_for(|| h.controller.sink().len() == 1).await;

        assert_eq!(h.controller.stop().await, Outcome::Applied);
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(h.controller.descriptor().is_none());
        assert!(!connection.is_connected());
        assert!(media.is_stopped());
        assert!(h.controller.sink().is_empty());
        assert_eq!(h.surface.detaches.load(Ordering::SeqCst), 1);
        assert_eq!(h.control_plane.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let h = harness(FakeControlPlane::default());
        assert_eq!(h.controller.stop().await, Outcome::Ignored(IgnoreReason::NotActive));
        assert_eq!(h.control_plane.stops.load(Ordering::SeqCst), 0);
        assert_eq!(h.surface.detaches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_talk_guards() {
        let h = harness(FakeControlPlane::default());
        assert_eq!(
            h.controller.talk("hello").await.unwrap(),
            Outcome::Ignored(IgnoreReason::NotActive)
        );

        h.controller.start().await.unwrap();
        assert_eq!(
            h.controller.talk("   ").await.unwrap(),
            Outcome::Ignored(IgnoreReason::EmptyText)
        );
        assert_eq!(h.controller.talk("  Hello ").await.unwrap(), Outcome::Applied);
        assert_eq!(
            h.controller.say("Echo", TaskType::Repeat).await.unwrap(),
            Outcome::Applied
        );
        assert_eq!(
            h.control_plane.tasks.lock().clone(),
            vec![("Hello".to_string(), TaskType::Talk), ("Echo".to_string(), TaskType::Repeat)]
        );
    }

    #[tokio::test]
    async fn test_failed_talk_keeps_session_active() {
        let h = harness(FakeControlPlane {
            fail_tasks: true,
            ..Default::default()
        });
        h.controller.start().await.unwrap();
        assert!(h.controller.talk("Hello").await.is_err());
        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(h.surface.errors.lock()[0].starts_with("Send failed: "));
    }

    #[tokio::test]
    async fn test_shutdown_skips_network_stop_and_refuses_start() {
        let h = harness(FakeControlPlane::default());
        h.controller.start().await.unwrap();
        let connection = h.connector.last_connection().unwrap();

        h.controller.shutdown().await;
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!connection.is_connected());
        assert_eq!(h.control_plane.stops.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.controller.start().await.unwrap(),
            Outcome::Ignored(IgnoreReason::ShutDown)
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_start_leaves_new_room() {
        let h = harness(FakeControlPlane::default());
        h.connector.set_connect_delay(Duration::from_millis(100));

        let controller = h.controller.clone();
        let start = tokio::spawn(async move { controller.start().await });
        wait_for(|| h.connector.connect_count() == 1).await;
        assert_eq!(h.controller.state(), SessionState::Starting);

        h.controller.shutdown().await;
        assert_eq!(
            start.await.unwrap().unwrap(),
            Outcome::Ignored(IgnoreReason::ShutDown)
        );
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.connector.open_connections(), 0);
        assert!(h.controller.descriptor().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_when_idle_clears_sink() {
        let h = harness(FakeControlPlane::default());
        h.controller.shutdown().await;
        assert!(h.controller.is_shut_down());
        assert_eq!(h.surface.detaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_loss_stops_session() {
        let h = harness(FakeControlPlane::default());
        h.controller.start().await.unwrap();
        h.connector.last_connection().unwrap().drop_remote("server gone");

        wait_for(|| h.controller.state() == SessionState::Idle).await;
        assert_eq!(h.control_plane.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.surface.errors.lock().clone(),
            vec!["Connection lost: server gone".to_string()]
        );
    }

    #[tokio::test]
    async fn test_loss_while_starting_fails_the_start() {
        let h = harness(FakeControlPlane::default());
        h.connector.set_connect_delay(Duration::from_millis(100));

        let controller = h.controller.clone();
        let start = tokio::spawn(async move { controller.start().await });
        wait_for(|| h.connector.connect_count() == 1).await;

        h.controller.on_connection_lost(1, "gone".to_string()).await;
        assert_eq!(h.controller.state(), SessionState::Starting);

        let err = start.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(h.controller.descriptor().is_none());
        assert_eq!(h.control_plane.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.connector.open_connections(), 0);
        assert_eq!(
            h.surface.errors.lock().clone(),
            vec!["Start failed: Transport error: Room connection lost during start: gone".to_string()]
        );

        // The recorded loss belongs to that start only
        h.connector.set_connect_delay(Duration::ZERO);
        assert_eq!(h.controller.start().await.unwrap(), Outcome::Applied);
        assert_eq!(h.controller.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_intents_dispatch() {
        let h = harness(FakeControlPlane::default());
        assert!(h.controller.handle_intent(SurfaceIntent::Start).await.unwrap().is_applied());
        assert!(h
            .controller
            .handle_intent(SurfaceIntent::Talk("Hi".to_string()))
            .await
            .unwrap()
            .is_applied());
        assert!(h.controller.handle_intent(SurfaceIntent::Stop).await.unwrap().is_applied());

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert!(snapshot.session_id.is_none());
    }
}
