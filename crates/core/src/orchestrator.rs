use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::execution::{BackgroundExecuteResponse, ExecutionContext, ResumeResponse, SessionHandle};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response body: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status for the failure. A client-side timeout reports 504.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Timeout => Some(504),
            ApiError::Transport(_) | ApiError::InvalidResponse(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// HTTP surface of the execution orchestrator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    async fn execute_background(
        &self,
        transcript: &str,
    ) -> Result<BackgroundExecuteResponse, ApiError>;

    async fn fetch_context(&self, session: &SessionHandle) -> Result<ExecutionContext, ApiError>;

    async fn resume(&self, session: &SessionHandle, answer: &str)
        -> Result<ResumeResponse, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

pub struct OrchestratorClient {
    client: Client,
    base_url: String,
}

impl OrchestratorClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl OrchestratorApi for OrchestratorClient {
    async fn execute_background(
        &self,
        transcript: &str,
    ) -> Result<BackgroundExecuteResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/api/execute/background"))
            .json(&serde_json::json!({ "transcript": transcript }))
            .send()
            .await?;
        parse(response, "Failed to start execution").await
    }

    async fn fetch_context(&self, session: &SessionHandle) -> Result<ExecutionContext, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/context/{}", session)))
            .send()
            .await?;
        parse(response, "Failed to fetch execution context").await
    }

    async fn resume(
        &self,
        session: &SessionHandle,
        answer: &str,
    ) -> Result<ResumeResponse, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/api/resume/{}", session)))
            .json(&serde_json::json!({ "answer": answer }))
            .send()
            .await?;
        parse(response, "Failed to resume execution").await
    }
}

async fn parse<T: DeserializeOwned>(response: Response, fallback: &str) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody { detail: Some(detail) }) => detail,
            Ok(ErrorBody { detail: None }) => fallback.to_string(),
            Err(_) => "Unknown error".to_string(),
        };
        tracing::warn!(status = status.as_u16(), "orchestrator request failed: {}", message);
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(format!("{e}: {body}")))
}
