//! REST access to the college backend.
//!
//! Everything the import pipeline and thread view need from the server goes
//! through [`CollegeApi`], so both can run against an in-memory double in
//! tests. [`HttpApi`] is the real implementation.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::{ClientConfig, ConfigError, API_URL_VAR};
use crate::models::{
    AttendanceRecord, Credentials, NewMessage, Registration, Thread, ThreadMessage, User,
};

const GENERIC_FAILURE: &str = "An error occurred. Please try again.";

#[derive(Error, Debug)]
pub enum ApiError {
    /// The server answered with a non-success status. `message` is the
    /// server's own `message` field when it sent one.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ThreadsData {
    threads: Vec<Thread>,
}

#[derive(Debug, Deserialize)]
struct ThreadData {
    thread: Thread,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    message: ThreadMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsnLookup {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginData {
    pub user: User,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
    pub data: LoginData,
}

#[async_trait]
pub trait CollegeApi: Send + Sync {
    /// `GET /users/usn/{usn}`. `Ok(None)` when the USN is unknown.
    async fn resolve_usn(&self, usn: &str) -> Result<Option<String>, ApiError>;

    async fn record_attendance(
        &self,
        user_id: &str,
        record: &AttendanceRecord,
    ) -> Result<(), ApiError>;

    async fn register_user(&self, registration: &Registration) -> Result<(), ApiError>;

    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError>;

    async fn get_thread(&self, thread_id: &str) -> Result<Thread, ApiError>;

    async fn post_message(
        &self,
        thread_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<ThreadMessage, ApiError>;

    async fn close_thread(&self, thread_id: &str) -> Result<(), ApiError>;
}

/// `reqwest`-backed client. The bearer token is held here and only changes
/// through [`HttpApi::set_token`] (or a successful [`HttpApi::login`]).
pub struct HttpApi {
    client: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base_url = config.api_url()?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl {
                var: API_URL_VAR,
                value: base_url.to_string(),
            }
            .into());
        }
        Ok(HttpApi {
            client: Client::new(),
            base_url,
            token: RwLock::new(config.token.clone()),
        })
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// `POST /users/login`; installs the returned token for later calls.
    pub async fn login(&self, credentials: &Credentials<'_>) -> Result<LoginResponse, ApiError> {
        let response = self
            .request(Method::POST, &["users", "login"])
            .await
            .json(credentials)
            .send()
            .await?;
        let login: LoginResponse = Self::parse(response).await?;

        if let Some(token) = &login.token {
            self.set_token(Some(token.clone())).await;
        }
        Ok(login)
    }

    /// Each segment is percent-encoded, so ids cannot leave their segment.
    async fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        debug!("{} {}", method, url);

        let builder = self.client.request(method, url);
        match self.token.read().await.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| GENERIC_FAILURE.to_string());
        warn!("Request failed with status {}: {}", status, message);

        Err(ApiError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::check(response).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl CollegeApi for HttpApi {
    async fn resolve_usn(&self, usn: &str) -> Result<Option<String>, ApiError> {
        let response = self
            .request(Method::GET, &["users", "usn", usn])
            .await
            .send()
            .await?;

        match Self::parse::<UsnLookup>(response).await {
            Ok(lookup) => Ok(lookup.user_id.filter(|id| !id.is_empty())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn record_attendance(
        &self,
        user_id: &str,
        record: &AttendanceRecord,
    ) -> Result<(), ApiError> {
        let response = self
            .request(Method::POST, &["students", "attendance", user_id])
            .await
            .json(record)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn register_user(&self, registration: &Registration) -> Result<(), ApiError> {
        let role = registration.role().path_segment();
        let response = self
            .request(Method::POST, &["auth", role, "register"])
            .await
            .json(registration)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError> {
        let response = self.request(Method::GET, &["threads"]).await.send().await?;
        let envelope: Envelope<ThreadsData> = Self::parse(response).await?;
        Ok(envelope.data.threads)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Thread, ApiError> {
        let response = self
            .request(Method::GET, &["threads", thread_id])
            .await
            .send()
            .await?;
        let envelope: Envelope<ThreadData> = Self::parse(response).await?;
        Ok(envelope.data.thread)
    }

    async fn post_message(
        &self,
        thread_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<ThreadMessage, ApiError> {
        let response = self
            .request(Method::POST, &["threads", thread_id, "messages"])
            .await
            .json(&NewMessage { sender_id, body })
            .send()
            .await?;
        let envelope: Envelope<MessageData> = Self::parse(response).await?;
        Ok(envelope.data.message)
    }

    async fn close_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        let response = self
            .request(Method::PATCH, &["threads", thread_id, "close"])
            .await
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }
}
