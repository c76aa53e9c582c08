use std::collections::BTreeMap;

use anyhow::Context;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::session::{Route, Session, UserProfile};

pub const GENERIC_AUTH_FAILURE: &str = "Something went wrong. Please try again.";
const LOGIN_FAILED: &str = "Login failed";
const SIGNUP_FAILED: &str = "Signup failed";

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The backend refused the request; carries its message or a fallback.
    #[error("{0}")]
    Rejected(String),

    #[error("auth request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected auth response from {url}: {detail}")]
    Malformed { url: String, detail: String },

    #[error("failed to persist session: {0:#}")]
    Session(anyhow::Error),
}

impl AuthError {
    /// Text shown to the user in the blocking failure alert.
    pub fn alert_message(&self) -> String {
        match self {
            AuthError::Rejected(message) if !message.trim().is_empty() => message.clone(),
            _ => GENERIC_AUTH_FAILURE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed building HTTP client for auth")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Registers an account. Success routes to the login screen; no session
    /// is created.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn signup(&self, request: &SignupRequest) -> Result<Route, AuthError> {
        self.post("/auth/signup", request, SIGNUP_FAILED).await?;
        info!("signup accepted");
        Ok(Route::Login)
    }

    /// Logs in and stores token plus profile in `session`. When the backend
    /// does not echo a user record the profile is built from the login email.
    #[instrument(skip(self, request, session), fields(email = %request.email))]
    pub async fn login(&self, request: &LoginRequest, session: &mut Session) -> Result<Route, AuthError> {
        let url = format!("{}/auth/login", self.base_url);
        let raw = self.post("/auth/login", request, LOGIN_FAILED).await?;
        let response: LoginResponse =
            serde_json::from_str(&raw).map_err(|err| AuthError::Malformed {
                url,
                detail: err.to_string(),
            })?;

        let user = response.user.unwrap_or_else(|| UserProfile {
            name: String::new(),
            email: request.email.clone(),
        });
        session
            .start(&response.token, &user)
            .map_err(AuthError::Session)?;
        info!(extra_fields = response.extra.len(), "login accepted");
        Ok(Route::Calendar)
    }

    async fn post<B>(&self, path: &str, body: &B, fallback: &str) -> Result<String, AuthError>
    where
        B: Serialize,
    {
        let url = format!("{}{}", self.base_url, path);
        let payload = serde_json::to_string(body).map_err(|err| AuthError::Malformed {
            url: url.clone(),
            detail: err.to_string(),
        })?;

        let response = self
            .client
            .post(url.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|source| AuthError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let raw = response.text().await.map_err(|source| AuthError::Transport {
            url: url.clone(),
            source,
        })?;

        if status.is_success() {
            return Ok(raw);
        }

        warn!(url = %url, status = %status, "auth request rejected");
        Err(AuthError::Rejected(rejection_message(&raw, fallback)))
    }
}

fn rejection_message(raw: &str, fallback: &str) -> String {
    serde_json::from_str::<ErrorBody>(raw)
        .ok()
        .and_then(|body| body.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
