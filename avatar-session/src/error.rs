//! Error types for avatar-session

use thiserror::Error;

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Token issuance was rejected or returned no token
    #[error("Auth error: {0}")]
    Auth(String),

    /// A control-plane call returned a non-success status or a malformed body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The real-time room connection failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The HTTP request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl SessionError {
    /// Short category label attached to failure logs
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Auth(_) => "auth",
            SessionError::Protocol(_) => "protocol",
            SessionError::Transport(_) => "transport",
            SessionError::Network(_) => "network",
            SessionError::Config(_) | SessionError::ConfigParse(_) => "config",
            SessionError::Io(_) => "io",
            SessionError::Url(_) => "url",
        }
    }
}
