use std::future::Future;

use anyhow::Context;
use reqwest::{Method, StatusCode, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::task::{Task, TaskDraft};

pub const DEFAULT_API_URL: &str = "http://localhost:5000";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-success HTTP status; displays as the status text.
    #[error("{status_text}")]
    Status { status: u16, status_text: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAck {
    #[serde(default)]
    pub message: String,
}

/// The four task operations the backend exposes.
pub trait TaskApi {
    fn list(&self) -> impl Future<Output = Result<ApiResponse<Vec<Task>>, ApiError>> + Send;

    fn create(
        &self,
        draft: &TaskDraft,
    ) -> impl Future<Output = Result<ApiResponse<Task>, ApiError>> + Send;

    fn update(
        &self,
        id: u64,
        draft: &TaskDraft,
    ) -> impl Future<Output = Result<ApiResponse<Task>, ApiError>> + Send;

    fn delete(&self, id: u64) -> impl Future<Output = Result<ApiResponse<DeleteAck>, ApiError>> + Send;
}

/// `TaskApi` over HTTP. One attempt per call; the bearer token is sent only
/// when one is present.
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTaskApi {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed building HTTP client for task API")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&TaskDraft>,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let mut request = self.client.request(method.clone(), url.as_str());
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(draft) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(serde_json::to_string(draft)?);
        }

        debug!(%method, url = %url, auth = self.token.is_some(), "sending task API request");
        let response = request.send().await.map_err(|source| ApiError::Transport {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%method, url = %url, status = %status, "task API returned non-success status");
            return Err(ApiError::Status {
                status: status.as_u16(),
                status_text: status_text(status),
            });
        }

        let raw = response.text().await.map_err(|source| ApiError::Transport {
            url: url.clone(),
            source,
        })?;
        let payload = if raw.trim().is_empty() { "{}" } else { raw.as_str() };
        let data = serde_json::from_str(payload).map_err(|source| ApiError::Decode { url, source })?;
        Ok(ApiResponse { data })
    }
}

impl TaskApi for HttpTaskApi {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<ApiResponse<Vec<Task>>, ApiError> {
        let response: ApiResponse<Vec<Task>> = self.send(Method::GET, "/tasks", None).await?;
        debug!(count = response.data.len(), "listed tasks");
        Ok(response)
    }

    #[instrument(skip(self, draft), fields(title = ?draft.title))]
    async fn create(&self, draft: &TaskDraft) -> Result<ApiResponse<Task>, ApiError> {
        self.send(Method::POST, "/tasks", Some(draft)).await
    }

    #[instrument(skip(self, draft))]
    async fn update(&self, id: u64, draft: &TaskDraft) -> Result<ApiResponse<Task>, ApiError> {
        self.send(Method::PUT, &format!("/tasks/{id}"), Some(draft)).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: u64) -> Result<ApiResponse<DeleteAck>, ApiError> {
        self.send(Method::DELETE, &format!("/tasks/{id}"), None).await
    }
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string())
}
