//! HTTP implementation of the streaming control plane

use crate::config::SessionConfig;
use crate::control_plane::ControlPlane;
use crate::error::SessionError;
use crate::types::{SessionDescriptor, SessionToken, TaskType};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const API_VERSION: &str = "v2";
const QUALITY: &str = "high";
const VIDEO_ENCODING: &str = "H264";

const MAX_RESPONSE_SIZE: usize = 100 * 1024;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewSessionData {
    session_id: Option<String>,
    url: Option<String>,
    access_token: Option<String>,
    session_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewSessionRequest<'a> {
    version: &'a str,
    quality: &'a str,
    avatar_id: &'a str,
    video_encoding: &'a str,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Serialize)]
struct TaskRequest<'a> {
    session_id: &'a str,
    text: &'a str,
    task_type: TaskType,
}

/// Streaming API client
pub struct StreamingApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl StreamingApiClient {
    /// Create a client from validated configuration
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        config.validate().map_err(SessionError::Config)?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SessionError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, operation: &str) -> String {
        format!("{}/v1/{}", self.base_url, operation)
    }

    fn authorized(&self, operation: &str, token: &SessionToken) -> RequestBuilder {
        self.client
            .post(self.endpoint(operation))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", token.as_str()))
    }

    async fn send(operation: &str, request: RequestBuilder) -> Result<Response, SessionError> {
        debug!("POST {}", operation);
        request
            .send()
            .await
            .map_err(|e| SessionError::Network(format!("{} request failed: {}", operation, e)))
    }

    /// Send a request whose success needs nothing beyond a 2xx status
    async fn send_expecting_success(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<(), SessionError> {
        let response = Self::send(operation, request).await?;
        if !response.status().is_success() {
            return Err(SessionError::Protocol(format!(
                "{} failed: {}",
                operation,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Read a `{ data: ... }` envelope with a size cap
async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<Option<T>, String> {
    if let Some(length) = response.content_length() {
        if length as usize > MAX_RESPONSE_SIZE {
            return Err(format!("response too large (max {} bytes)", MAX_RESPONSE_SIZE));
        }
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| format!("failed to read response: {}", e))?;
    if bytes.len() > MAX_RESPONSE_SIZE {
        return Err(format!("response too large (max {} bytes)", MAX_RESPONSE_SIZE));
    }
    let envelope: Envelope<T> =
        serde_json::from_slice(&bytes).map_err(|e| format!("failed to parse response: {}", e))?;
    Ok(envelope.data)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[async_trait]
impl ControlPlane for StreamingApiClient {
    async fn issue_token(&self) -> Result<SessionToken, SessionError> {
        let operation = "streaming.create_token";
        let request = self
            .client
            .post(self.endpoint(operation))
            .header("Content-Type", "application/json")
            .header("X-Api-Key", &self.api_key);

        let response = Self::send(operation, request).await?;
        if !response.status().is_success() {
            return Err(SessionError::Auth(format!(
                "create_token failed: {}",
                response.status()
            )));
        }

        let data: Option<TokenData> = read_envelope(response)
            .await
            .map_err(|e| SessionError::Auth(format!("create_token {}", e)))?;
        let token = non_empty(data.and_then(|d| d.token))
            .ok_or_else(|| SessionError::Auth("No session token in response".to_string()))?;

        debug!("Session token issued");
        Ok(SessionToken::new(token))
    }

    async fn create_session(
        &self,
        token: &SessionToken,
        avatar_id: &str,
    ) -> Result<SessionDescriptor, SessionError> {
        let operation = "streaming.new";
        let body = NewSessionRequest {
            version: API_VERSION,
            quality: QUALITY,
            avatar_id,
            video_encoding: VIDEO_ENCODING,
        };
        let response = Self::send(operation, self.authorized(operation, token).json(&body)).await?;
        if !response.status().is_success() {
            return Err(SessionError::Protocol(format!(
                "{} failed: {}",
                operation,
                response.status()
            )));
        }

        let data: NewSessionData = read_envelope(response)
            .await
            .map_err(|e| SessionError::Protocol(format!("{} {}", operation, e)))?
            .ok_or_else(|| SessionError::Protocol("Invalid session response".to_string()))?;

        match (
            non_empty(data.session_id),
            non_empty(data.url),
            non_empty(data.access_token),
        ) {
            (Some(session_id), Some(transport_url), Some(transport_access_token)) => {
                info!("Remote session created: {}", session_id);
                Ok(SessionDescriptor {
                    session_id,
                    transport_url,
                    transport_access_token,
                    chat_token: non_empty(data.session_token),
                })
            }
            _ => Err(SessionError::Protocol("Invalid session response".to_string())),
        }
    }

    async fn start_stream(&self, token: &SessionToken, session_id: &str) -> Result<(), SessionError> {
        let operation = "streaming.start";
        let request = self
            .authorized(operation, token)
            .json(&SessionRequest { session_id });
        self.send_expecting_success(operation, request).await
    }

    async fn send_task(
        &self,
        token: &SessionToken,
        session_id: &str,
        text: &str,
        task_type: TaskType,
    ) -> Result<(), SessionError> {
        let operation = "streaming.task";
        let request = self.authorized(operation, token).json(&TaskRequest {
            session_id,
            text,
            task_type,
        });
        self.send_expecting_success(operation, request).await
    }

    async fn stop_stream(&self, token: &SessionToken, session_id: &str) -> Result<(), SessionError> {
        let operation = "streaming.stop";
        let request = self
            .authorized(operation, token)
            .json(&SessionRequest { session_id });
        self.send_expecting_success(operation, request).await
    }
}
