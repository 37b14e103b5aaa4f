//! Backend lookups used by a chat session.
//!
//! [`ChatBackend`] is the seam between the session and the HTTP API.
//! [`HttpBackend`] talks to the real server with the identity cookie on
//! every request; [`StaticBackend`] serves canned data for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::COOKIE;
use url::Url;

use mentorlink_proto::api::{ChatHistory, UserProfile};

use crate::chat::ParticipantId;

/// Errors from backend lookups.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or the body could not be decoded.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned status {0}")]
    Status(u16),

    /// The API base URL cannot carry path segments.
    #[error("invalid API URL: {0}")]
    InvalidUrl(String),
}

/// One-shot lookups the chat view needs from the backend.
pub trait ChatBackend: Send + Sync + 'static {
    /// Fetch prior messages exchanged with `target`.
    fn chat_history(
        &self,
        target: &ParticipantId,
    ) -> impl Future<Output = Result<ChatHistory, ApiError>> + Send;

    /// Fetch the display identity of `target`.
    fn user_profile(
        &self,
        target: &ParticipantId,
    ) -> impl Future<Output = Result<UserProfile, ApiError>> + Send;
}

/// [`ChatBackend`] over the HTTP API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpBackend {
    /// Create a backend for the API rooted at `base`
    /// (e.g. `http://localhost:7777/api/`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if `base` cannot have a path.
    pub fn new(base: Url, token: Option<String>) -> Result<Self, ApiError> {
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            token,
        })
    }

    /// Build `{base}/{segments...}`, escaping each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.header(COOKIE, format!("token={token}"));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%url, %status, "backend request rejected");
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

impl ChatBackend for HttpBackend {
    async fn chat_history(&self, target: &ParticipantId) -> Result<ChatHistory, ApiError> {
        let url = self.endpoint(&["chat", target.as_str()])?;
        self.get_json(url).await
    }

    async fn user_profile(&self, target: &ParticipantId) -> Result<UserProfile, ApiError> {
        let url = self.endpoint(&["user", target.as_str()])?;
        self.get_json(url).await
    }
}

/// In-memory [`ChatBackend`] for tests.
///
/// Unknown targets answer with status 404. A response delay can be set to
/// make lookups complete after live traffic.
#[derive(Debug, Default)]
pub struct StaticBackend {
    histories: Mutex<HashMap<String, ChatHistory>>,
    profiles: Mutex<HashMap<String, UserProfile>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl StaticBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `history` for `target`.
    #[must_use]
    pub fn with_history(self, target: &str, history: ChatHistory) -> Self {
        self.histories.lock().insert(target.to_string(), history);
        self
    }

    /// Serve `profile` for `target`.
    #[must_use]
    pub fn with_profile(self, target: &str, profile: UserProfile) -> Self {
        self.profiles.lock().insert(target.to_string(), profile);
        self
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of lookups served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond<T: Clone>(
        &self,
        table: &Mutex<HashMap<String, T>>,
        target: &ParticipantId,
    ) -> Result<T, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        table
            .lock()
            .get(target.as_str())
            .cloned()
            .ok_or(ApiError::Status(404))
    }
}

impl ChatBackend for StaticBackend {
    async fn chat_history(&self, target: &ParticipantId) -> Result<ChatHistory, ApiError> {
        self.respond(&self.histories, target).await
    }

    async fn user_profile(&self, target: &ParticipantId) -> Result<UserProfile, ApiError> {
        self.respond(&self.profiles, target).await
    }
}
