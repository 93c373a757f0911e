//! Resolving the stored session when the application starts.

use tracing::{debug, info, warn};

use crate::api::ApiRequest;
use crate::models::AuthUser;

use super::SessionManager;

/// Where the session stands. Published on a watch channel so protected
/// views can wait until it leaves `Initializing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Authenticated(AuthUser),
    Unauthenticated,
}

impl SessionStatus {
    /// Bootstrap has resolved, one way or the other.
    pub fn is_ready(&self) -> bool {
        !matches!(self, SessionStatus::Initializing)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionStatus::Authenticated(_))
    }

    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            SessionStatus::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

impl SessionManager {
    /// Turn stored credentials into a session status.
    ///
    /// With a refresh token the access token is renewed first (through the
    /// same single-flight as 401 recovery) and the identity fetched after.
    /// With only an access token the identity is fetched directly. Without
    /// any token nothing is sent. Concurrent calls share one attempt and
    /// later calls return the resolved status.
    pub async fn bootstrap(&self) -> SessionStatus {
        let current = self.status();
        if current.is_ready() {
            return current;
        }

        let session = self.clone();
        let outcome = self
            .inner
            .bootstrap
            .run(move || async move { Ok(session.resolve_stored_session().await) })
            .await;
        match outcome {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Session bootstrap did not complete");
                self.force_logout();
                SessionStatus::Unauthenticated
            }
        }
    }

    /// Wait until bootstrap has resolved.
    pub async fn ready(&self) -> SessionStatus {
        let mut status = self.subscribe();
        let resolved = status.wait_for(SessionStatus::is_ready).await.map(|s| s.clone());
        resolved.unwrap_or_else(|_| self.status())
    }

    async fn resolve_stored_session(&self) -> SessionStatus {
        let Some(credentials) = self.credentials() else {
            debug!("No stored session");
            self.set_status(SessionStatus::Unauthenticated);
            return SessionStatus::Unauthenticated;
        };

        if credentials.has_refresh_token() {
            let stale_access = credentials.access_token.filter(|t| !t.is_empty());
            if let Err(e) = self.refresh().await {
                info!(error = %e, "Stored session could not be renewed");
                // Already logged out locally; tell the backend too
                self.notify_backend_logout(stale_access.as_deref()).await;
                return SessionStatus::Unauthenticated;
            }
        } else if !credentials.has_access_token() {
            self.set_status(SessionStatus::Unauthenticated);
            return SessionStatus::Unauthenticated;
        }

        let request = ApiRequest::get(self.inner.endpoints.me.as_str()).without_refresh();
        match self.fetch_user(request).await {
            Ok(Some(user)) => {
                info!(username = %user.username, "Session restored");
                let status = SessionStatus::Authenticated(user);
                self.set_status(status.clone());
                status
            }
            Ok(None) => {
                info!("Stored session is no longer valid");
                self.abandon_stored_session().await
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch identity for stored session");
                self.abandon_stored_session().await
            }
        }
    }

    async fn abandon_stored_session(&self) -> SessionStatus {
        let access_token = self.inner.store.access_token();
        self.notify_backend_logout(access_token.as_deref()).await;
        self.force_logout();
        SessionStatus::Unauthenticated
    }
}
