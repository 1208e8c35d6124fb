//! Control-plane client for the avatar streaming API

pub mod streaming_api;

pub use streaming_api::StreamingApiClient;

use crate::error::SessionError;
use crate::types::{SessionDescriptor, SessionToken, TaskType};
use async_trait::async_trait;

/// Request/response operations against the avatar service.
///
/// Every operation is a single attempt with no client-side retry. All calls
/// after token issuance authenticate with the session token as a bearer
/// credential.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Issue a session token using the static API key
    async fn issue_token(&self) -> Result<SessionToken, SessionError>;

    /// Create a remote session for the given avatar
    async fn create_session(
        &self,
        token: &SessionToken,
        avatar_id: &str,
    ) -> Result<SessionDescriptor, SessionError>;

    /// Ask the service to start publishing into the session's room
    async fn start_stream(&self, token: &SessionToken, session_id: &str) -> Result<(), SessionError>;

    /// Dispatch text for the avatar to speak
    async fn send_task(
        &self,
        token: &SessionToken,
        session_id: &str,
        text: &str,
        task_type: TaskType,
    ) -> Result<(), SessionError>;

    /// Stop the remote stream; callers treat failures as non-fatal
    async fn stop_stream(&self, token: &SessionToken, session_id: &str) -> Result<(), SessionError>;
}
