//! In-process stand-in for the admin backend's auth surface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::api::{ApiError, ApiRequest, ApiResponse};
use crate::transport::Transport;

pub(crate) const REFRESH_TOKEN: &str = "R1";

#[derive(Debug, Clone, Copy)]
pub(crate) enum RefreshMode {
    /// Issue the given access token, keep the refresh token.
    Issue(&'static str),
    /// Issue a new access and refresh token.
    Rotate(&'static str, &'static str),
    /// Only the legacy `/auth/token/refresh` spelling exists.
    SecondaryOnly(&'static str),
    Reject,
    /// The refresh call never reaches the backend.
    Fail,
}

#[derive(Debug, Clone)]
struct Seen {
    path: String,
    bearer: Option<String>,
    body: String,
}

pub(crate) struct FakeBackend {
    accepted: String,
    mode: RefreshMode,
    refresh_delay: Duration,
    identity: bool,
    seen: Mutex<Vec<Seen>>,
}

impl FakeBackend {
    /// Protected endpoints accept only `accepted` as bearer token.
    pub(crate) fn new(accepted: &str, mode: RefreshMode) -> Arc<Self> {
        Arc::new(Self {
            accepted: accepted.to_string(),
            mode,
            refresh_delay: Duration::ZERO,
            identity: true,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_refresh_delay(mut self: Arc<Self>, delay: Duration) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().refresh_delay = delay;
        self
    }

    /// `/auth/me` answers 404.
    pub(crate) fn without_identity(mut self: Arc<Self>) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().identity = false;
        self
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn seen_at(&self, matches: impl Fn(&str) -> bool) -> Vec<Seen> {
        self.seen().into_iter().filter(|s| matches(&s.path)).collect()
    }

    /// Bearer tokens sent to non-auth endpoints, in order.
    pub(crate) fn protected_tokens(&self) -> Vec<Option<String>> {
        self.seen_at(|p| !p.starts_with("/auth/"))
            .into_iter()
            .map(|s| s.bearer)
            .collect()
    }

    pub(crate) fn refresh_paths(&self) -> Vec<String> {
        self.seen_at(is_refresh).into_iter().map(|s| s.path).collect()
    }

    pub(crate) fn refresh_bodies(&self) -> Vec<String> {
        self.seen_at(is_refresh).into_iter().map(|s| s.body).collect()
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.seen_at(is_refresh).len()
    }

    pub(crate) fn me_calls(&self) -> usize {
        self.seen_at(|p| p == "/auth/me").len()
    }

    pub(crate) fn login_tokens(&self) -> Vec<Option<String>> {
        self.seen_at(|p| p == "/auth/token")
            .into_iter()
            .map(|s| s.bearer)
            .collect()
    }

    pub(crate) fn logout_tokens(&self) -> Vec<Option<String>> {
        self.seen_at(|p| p == "/auth/logout")
            .into_iter()
            .map(|s| s.bearer)
            .collect()
    }

    fn protected(&self, bearer: Option<&str>, body: String) -> ApiResponse {
        if bearer == Some(self.accepted.as_str()) {
            ApiResponse::new(StatusCode::OK, body)
        } else {
            ApiResponse::new(StatusCode::UNAUTHORIZED, r#"{"detail":"Not authenticated"}"#)
        }
    }

    async fn refresh(&self, path: &str, body: &str) -> Result<ApiResponse, ApiError> {
        tokio::time::sleep(self.refresh_delay).await;

        let presented = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("refresh_token").and_then(Value::as_str).map(str::to_string));
        let issued = match self.mode {
            RefreshMode::Fail => {
                return Err(ApiError::ServerError("connection reset".to_string()))
            }
            RefreshMode::SecondaryOnly(_) if path == "/auth/refresh" => {
                return Ok(ApiResponse::new(StatusCode::NOT_FOUND, ""))
            }
            _ if presented.as_deref() != Some(REFRESH_TOKEN) => None,
            RefreshMode::Issue(access) | RefreshMode::SecondaryOnly(access) => {
                Some(json!({ "access_token": access, "token_type": "bearer" }))
            }
            RefreshMode::Rotate(access, refresh) => {
                Some(json!({ "access_token": access, "refresh_token": refresh }))
            }
            RefreshMode::Reject => None,
        };
        Ok(match issued {
            Some(body) => ApiResponse::new(StatusCode::OK, body.to_string()),
            None => ApiResponse::new(StatusCode::UNAUTHORIZED, r#"{"detail":"Invalid refresh token"}"#),
        })
    }
}

fn is_refresh(path: &str) -> bool {
    path == "/auth/refresh" || path == "/auth/token/refresh"
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let bearer = request.bearer_token().map(str::to_string);
        let body = String::from_utf8_lossy(request.body.as_deref().unwrap_or_default()).into_owned();
        self.seen.lock().unwrap().push(Seen {
            path: request.url.clone(),
            bearer: bearer.clone(),
            body: body.clone(),
        });

        let path = request.url.as_str();
        match path {
            "/auth/token" => {
                let login: Value = serde_json::from_str(&body).unwrap_or_default();
                if login["password"] == "secret" {
                    Ok(ApiResponse::new(
                        StatusCode::OK,
                        json!({
                            "access_token": self.accepted,
                            "refresh_token": REFRESH_TOKEN,
                            "token_type": "bearer",
                            "username": login["username"],
                        })
                        .to_string(),
                    ))
                } else {
                    Ok(ApiResponse::new(
                        StatusCode::UNAUTHORIZED,
                        r#"{"detail":"Incorrect username or password"}"#,
                    ))
                }
            }
            "/auth/refresh" | "/auth/token/refresh" => self.refresh(path, &body).await,
            "/auth/me" if !self.identity => Ok(ApiResponse::new(StatusCode::NOT_FOUND, "")),
            "/auth/me" => Ok(self.protected(
                bearer.as_deref(),
                json!({ "username": "dispatch", "id": 1, "email": "dispatch@freightline.test" })
                    .to_string(),
            )),
            "/auth/logout" => Ok(ApiResponse::new(StatusCode::NO_CONTENT, "")),
            _ => {
                let echo = format!("Bearer {}", bearer.as_deref().unwrap_or_default());
                Ok(self.protected(bearer.as_deref(), echo))
            }
        }
    }
}
