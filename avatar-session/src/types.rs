//! Session data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Short-lived bearer credential for one session attempt
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

/// Remote session created by the control plane; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    /// Real-time room URL
    pub transport_url: String,
    /// Room access token
    pub transport_access_token: String,
    /// Token for the chat channel, when the service returns one
    pub chat_token: Option<String>,
}

/// Kind of spoken task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// The avatar responds conversationally
    Talk,
    /// The avatar repeats the text verbatim
    Repeat,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Talk => "talk",
            TaskType::Repeat => "repeat",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget text command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkRequest {
    pub text: String,
    pub task_type: TaskType,
}

impl TalkRequest {
    /// Build a request from raw user input; `None` when the text is blank
    pub fn new(text: &str, task_type: TaskType) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            task_type,
        })
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Why a controller call did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    AlreadyStarting,
    AlreadyActive,
    /// The previous session is still being torn down
    Stopping,
    /// No active session to act on
    NotActive,
    EmptyText,
    /// The controller has been torn down
    ShutDown,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IgnoreReason::AlreadyStarting => "a session is already starting",
            IgnoreReason::AlreadyActive => "a session is already active",
            IgnoreReason::Stopping => "the previous session is still stopping",
            IgnoreReason::NotActive => "no active session",
            IgnoreReason::EmptyText => "text is empty",
            IgnoreReason::ShutDown => "controller is shut down",
        };
        f.write_str(label)
    }
}

/// Result of a controller call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored(IgnoreReason),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

/// Point-in-time view of the controller for display
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub transport_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub track_count: usize,
}
