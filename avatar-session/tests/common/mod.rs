//! Shared fixtures for avatar-session integration tests

#![allow(dead_code)]

use avatar_session::{
    ControllerTimeouts, MediaSink, PlaybackError, PresentationSurface, SessionConfig,
    SessionController, StreamingApiClient,
};
use avatar_session::transport::LoopbackConnector;
use mockito::{Mock, ServerGuard};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Surface that records everything the controller does to it
#[derive(Default)]
pub struct RecordingSurface {
    pub errors: Mutex<Vec<String>>,
    pub attached: Mutex<Option<Arc<MediaSink>>>,
    pub plays: AtomicUsize,
    pub detaches: AtomicUsize,
}

impl RecordingSurface {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl PresentationSurface for RecordingSurface {
    fn attach_sink(&self, sink: Arc<MediaSink>) {
        *self.attached.lock() = Some(sink);
    }

    fn detach_sink(&self) {
        self.attached.lock().take();
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }

    fn play(&self) -> Result<(), PlaybackError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn show_error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

pub struct Fixture {
    pub server: ServerGuard,
    pub controller: Arc<SessionController>,
    pub connector: Arc<LoopbackConnector>,
    pub surface: Arc<RecordingSurface>,
}

pub fn test_config(server_url: &str) -> SessionConfig {
    SessionConfig {
        server_url: server_url.to_string(),
        api_key: "test-key".to_string(),
        ..SessionConfig::default()
    }
}

pub async fn fixture() -> Fixture {
    let server = mockito::Server::new_async().await;
    let config = test_config(&server.url());
    let client = StreamingApiClient::new(&config).unwrap();
    let connector = Arc::new(LoopbackConnector::new());
    let surface = Arc::new(RecordingSurface::default());
    let controller = SessionController::new(
        Arc::new(client),
        connector.clone(),
        surface.clone(),
        config.avatar_id.clone(),
        ControllerTimeouts::from_config(&config),
    );
    Fixture {
        server,
        controller,
        connector,
        surface,
    }
}

pub async fn mock_token(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/v1/streaming.create_token")
        .match_header("x-api-key", "test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":{"token":"t1"}}"#)
        .create_async()
        .await
}

pub async fn mock_new_session(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/v1/streaming.new")
        .match_header("authorization", "Bearer t1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":{"session_id":"s1","url":"wss://x","access_token":"a1"}}"#)
        .create_async()
        .await
}

pub async fn mock_ok(server: &mut ServerGuard, path: &str) -> Mock {
    server
        .mock("POST", path)
        .match_header("authorization", "Bearer t1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":100,"data":null}"#)
        .create_async()
        .await
}

/// Mock every endpoint of a healthy session
pub async fn mock_happy_path(server: &mut ServerGuard) {
    mock_token(server).await;
    mock_new_session(server).await;
    mock_ok(server, "/v1/streaming.start").await;
}

pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
