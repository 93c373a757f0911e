//! Typed JSON client for the Freightline admin API.
//!
//! `ApiClient` is a thin layer over [`SessionManager`]: it picks the API
//! version, maps error statuses to [`ApiError`] and backs off on 429. All
//! credential handling happens in the session, so v1 and v2 clients built on
//! the same session share one token refresh.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::session::SessionManager;

use super::{ApiError, ApiRequest, ApiResponse};

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiVersion {
    #[default]
    V1,
    V2,
}

impl ApiVersion {
    pub fn base_url(self, config: &Config) -> &str {
        match self {
            ApiVersion::V1 => &config.api_base_url,
            ApiVersion::V2 => &config.api_base_url_v2,
        }
    }
}

/// Clone is cheap - the session is shared, not copied.
#[derive(Debug, Clone)]
pub struct ApiClient {
    session: SessionManager,
    base_url: Option<String>,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Client whose paths resolve against the session transport's base URL.
    pub fn new(session: SessionManager) -> Self {
        Self {
            session,
            base_url: None,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    /// Client whose relative paths resolve against `base_url` instead.
    pub fn with_base_url(session: SessionManager, base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into().trim_end_matches('/').to_string()),
            ..Self::new(session)
        }
    }

    pub fn for_version(session: SessionManager, config: &Config, version: ApiVersion) -> Self {
        Self::with_base_url(session, version.base_url(config))
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn resolve(&self, mut request: ApiRequest) -> ApiRequest {
        if let Some(base) = &self.base_url {
            if !request.url.starts_with("http://") && !request.url.starts_with("https://") {
                request.url = format!("{}/{}", base, request.url.trim_start_matches('/'));
            }
        }
        request
    }

    /// Send through the session, retrying on 429. Non-success statuses are
    /// returned as errors.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let request = self.resolve(request);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.session.send(request.clone()).await?;
            if response.status != StatusCode::TOO_MANY_REQUESTS {
                debug!(method = %request.method, url = %request.url, status = response.status.as_u16(), "API response");
                return response.error_for_status();
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(url = %request.url, retry = retries, backoff = ?backoff, "Rate limited, backing off");
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2); // Exponential backoff
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        if response.body.iter().all(u8::is_ascii_whitespace) {
            // 204 and friends
            return serde_json::from_value(serde_json::Value::Null)
                .map_err(|e| ApiError::InvalidResponse(format!("Empty response body: {}", e)));
        }
        response.json()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::delete(path)).await
    }
}
