//! Session lifecycle: credential attachment, 401 recovery, login and logout.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::StatusCode;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, ApiResponse};
use crate::auth::{CredentialStore, Credentials, MemoryStore};
use crate::config::Config;
use crate::models::{AuthUser, LoginRequest, TokenResponse};
use crate::transport::{ReqwestTransport, Transport};

use super::interceptor::{self, Outcome};
use super::refresh::{self, RefreshError};
use super::single_flight::SingleFlight;
use super::{AuthEndpoints, SessionStatus};

/// Called after the session was dropped because it could not be renewed.
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

/// Owns the refresh state and wraps a [`Transport`] with credential
/// handling.
///
/// Clone is cheap; clones share credentials, refresh state and status.
#[derive(Clone)]
pub struct SessionManager {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) store: Arc<dyn CredentialStore>,
    pub(super) endpoints: AuthEndpoints,
    pub(super) on_logout: Option<LogoutHook>,
    pub(super) refresh: SingleFlight<Credentials, RefreshError>,
    pub(super) bootstrap: SingleFlight<SessionStatus, RefreshError>,
    pub(super) status: watch::Sender<SessionStatus>,
    /// Bumped whenever the session ends or is replaced. Store writes from a
    /// refresh happen under this lock and only while the epoch is unchanged.
    epoch: Mutex<u64>,
}

pub struct SessionManagerBuilder {
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn CredentialStore>>,
    endpoints: AuthEndpoints,
    on_logout: Option<LogoutHook>,
}

impl SessionManagerBuilder {
    /// Credential store shared with the application. Defaults to a fresh
    /// [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn endpoints(mut self, endpoints: AuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Reaction to a forced logout, e.g. sending the user back to login.
    /// Invoked after the stored credentials were cleared.
    pub fn on_logout<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_logout = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> SessionManager {
        let (status, _) = watch::channel(SessionStatus::Initializing);
        SessionManager {
            inner: Arc::new(Inner {
                transport: self.transport,
                store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                endpoints: self.endpoints,
                on_logout: self.on_logout,
                refresh: SingleFlight::new(),
                bootstrap: SingleFlight::new(),
                status,
                epoch: Mutex::new(0),
            }),
        }
    }
}

impl SessionManager {
    pub fn builder<T: Transport + 'static>(transport: T) -> SessionManagerBuilder {
        SessionManagerBuilder {
            transport: Arc::new(transport),
            store: None,
            endpoints: AuthEndpoints::default(),
            on_logout: None,
        }
    }

    /// Builder wired to the configured v1 base URL, timeout, auth paths and
    /// credential store.
    pub fn from_config(config: &Config) -> anyhow::Result<SessionManagerBuilder> {
        let transport = ReqwestTransport::new(&config.api_base_url, config.request_timeout())?;
        Ok(Self::builder(transport)
            .store(config.open_store()?)
            .endpoints(config.auth.clone()))
    }

    /// Send a request with the current access token attached.
    ///
    /// A 401 on an ordinary request is recovered once: the request waits for
    /// the (shared) token refresh and is replayed with the new token. The
    /// replay's response is returned as-is, whatever its status. Responses
    /// with other statuses are never turned into errors here.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let endpoints = &self.inner.endpoints;
        let access_token = self.inner.store.access_token();
        let outgoing =
            interceptor::attach_credential(request.clone(), endpoints, access_token.as_deref());

        let response = self.inner.transport.send(outgoing).await?;
        if interceptor::classify(&request, &response, endpoints) == Outcome::Pass {
            return Ok(response);
        }

        debug!(url = %request.url, "Access token rejected, recovering session");
        // Compare against the stored token, not the header: a token that
        // could not be attached still counts as the one that was rejected
        let token = self.recover(access_token.as_deref()).await?;
        let replay = interceptor::with_bearer(request.without_refresh(), &token);
        let url = replay.url.clone();
        let response = self.inner.transport.send(replay).await?;
        if response.is_unauthorized() {
            warn!(url = %url, "Request still unauthorized after session refresh");
        }
        Ok(response)
    }

    /// Token to replay a rejected request with.
    async fn recover(&self, rejected: Option<&str>) -> Result<String, ApiError> {
        if let Some(current) = self.inner.store.access_token() {
            if rejected != Some(current.as_str()) && !self.is_refreshing() {
                debug!("Access token was replaced while the request was in flight");
                return Ok(current);
            }
        }

        let credentials = self.refresh().await?;
        credentials
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RefreshError::MissingAccessToken.into())
    }

    /// Renew the access token, joining a refresh that is already running.
    ///
    /// On failure the session has been force-logged-out before this returns.
    pub async fn refresh(&self) -> Result<Credentials, RefreshError> {
        let session = self.clone();
        self.inner
            .refresh
            .run(move || async move { session.renew().await })
            .await
    }

    async fn renew(&self) -> Result<Credentials, RefreshError> {
        let Some(refresh_token) = self.inner.store.refresh_token() else {
            warn!("No refresh token stored, forcing logout");
            self.force_logout();
            return Err(RefreshError::MissingRefreshToken);
        };

        let epoch = *self.epoch();
        info!("Refreshing access token");
        let outcome = refresh::request_new_tokens(
            self.inner.transport.as_ref(),
            &self.inner.endpoints,
            &refresh_token,
        )
        .await;

        let current = self.epoch();
        if *current != epoch {
            info!("Session ended while refreshing, discarding refresh result");
            return Err(RefreshError::Interrupted(
                "session ended while refreshing".to_string(),
            ));
        }
        match outcome {
            Ok(tokens) => {
                let credentials = Credentials::from_response(&tokens, Some(&refresh_token));
                self.persist(&credentials);
                drop(current);
                info!(
                    rotated = tokens.refresh_token().is_some(),
                    "Access token refreshed"
                );
                Ok(credentials)
            }
            Err(e) => {
                drop(current);
                warn!(error = %e, "Token refresh failed, forcing logout");
                self.force_logout();
                Err(e)
            }
        }
    }

    /// Log in with username and password.
    ///
    /// A rejected login is returned as [`ApiError::Unauthorized`]; it never
    /// triggers a refresh.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthUser, ApiError> {
        let request = ApiRequest::post(self.inner.endpoints.login.as_str())
            .json(&LoginRequest { username, password })?;
        let response = self.send(request).await?.error_for_status()?;
        let tokens: TokenResponse = response.json()?;
        if tokens.access_token().is_none() {
            return Err(ApiError::InvalidResponse(
                "Login response did not include an access token".to_string(),
            ));
        }

        {
            // A refresh still running for the previous session must not
            // overwrite these tokens
            let mut epoch = self.epoch();
            *epoch += 1;
            self.persist(&Credentials::from_response(&tokens, None));
        }
        let user = AuthUser::new(
            tokens
                .username
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| username.to_string()),
        );
        self.inner
            .status
            .send_replace(SessionStatus::Authenticated(user.clone()));
        info!(username = %user.username, "Logged in");
        Ok(user)
    }

    /// Close the session on the backend (best effort) and locally.
    ///
    /// Unlike [`force_logout`](Self::force_logout) this does not invoke the
    /// logout hook: the application asked for it.
    pub async fn logout(&self) {
        let token = self.inner.store.access_token();
        self.notify_backend_logout(token.as_deref()).await;
        self.clear_session();
    }

    pub(super) async fn notify_backend_logout(&self, access_token: Option<&str>) {
        let mut request = ApiRequest::post(self.inner.endpoints.logout.as_str()).without_refresh();
        if let Some(token) = access_token {
            request = interceptor::with_bearer(request, token);
        }
        match self.inner.transport.send(request).await {
            Ok(response) if response.is_success() => debug!("Backend session closed"),
            Ok(response) => debug!(
                status = response.status.as_u16(),
                "Ignoring logout endpoint failure"
            ),
            Err(e) => warn!(error = %e, "Ignoring logout endpoint failure"),
        }
    }

    /// Fetch the signed-in user. `None` when the backend does not know the
    /// session (401 after recovery, or 404).
    pub async fn current_user(&self) -> Result<Option<AuthUser>, ApiError> {
        self.fetch_user(ApiRequest::get(self.inner.endpoints.me.as_str()))
            .await
    }

    pub(super) async fn fetch_user(
        &self,
        request: ApiRequest,
    ) -> Result<Option<AuthUser>, ApiError> {
        let response = self.send(request).await?;
        match response.status {
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Ok(None),
            _ => Ok(Some(response.error_for_status()?.json()?)),
        }
    }

    /// Drop the session and notify the application.
    pub fn force_logout(&self) {
        self.clear_session();
        if let Some(hook) = &self.inner.on_logout {
            hook();
        }
    }

    pub(super) fn clear_session(&self) {
        {
            let mut epoch = self.epoch();
            *epoch += 1;
            if let Err(e) = self.inner.store.clear() {
                warn!(error = %e, store = self.inner.store.name(), "Failed to clear stored credentials");
            }
        }
        self.inner
            .status
            .send_replace(SessionStatus::Unauthenticated);
        info!("Session cleared");
    }

    pub(super) fn set_status(&self, status: SessionStatus) {
        self.inner.status.send_replace(status);
    }

    fn epoch(&self) -> MutexGuard<'_, u64> {
        self.inner.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, credentials: &Credentials) {
        if let Err(e) = self.inner.store.save(credentials) {
            warn!(error = %e, store = self.inner.store.name(), "Failed to persist tokens");
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch status changes, e.g. to gate protected views until bootstrap
    /// has finished.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.in_flight()
    }

    /// Requests currently waiting on a token refresh.
    pub fn pending_requests(&self) -> usize {
        self.inner.refresh.waiters()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.store.load()
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.inner.endpoints
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.inner.store.name())
            .field("status", &self.status())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}
