use std::fmt;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::TokenResponse;

/// Bearer tokens for the admin API.
///
/// Either token may be absent: a keyring-backed store only persists the
/// refresh token, so after a restart only that half is known.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub obtained_at: DateTime<Utc>,
    /// Lifetime hint in seconds, when the backend sends one.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl Credentials {
    pub fn new(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token,
            obtained_at: Utc::now(),
            expires_in: None,
        }
    }

    /// Build credentials from a token endpoint response. When the backend
    /// does not rotate the refresh token, `previous_refresh` is kept.
    pub fn from_response(response: &TokenResponse, previous_refresh: Option<&str>) -> Self {
        Self {
            access_token: response.access_token().map(str::to_string),
            refresh_token: response
                .refresh_token()
                .or(previous_refresh)
                .map(str::to_string),
            obtained_at: Utc::now(),
            expires_in: response.expires_in,
        }
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Expiry according to the lifetime hint. The server stays the authority.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| self.obtained_at + Duration::seconds(secs))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at().map(|at| Utc::now() > at).unwrap_or(false)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.expires_at()
            .map(|at| (at - Utc::now()).num_minutes().max(0))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("obtained_at", &self.obtained_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Where the session keeps its tokens.
///
/// Shared between the session manager, which reads it before every request
/// and writes it after a refresh or logout, and the application shell.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<Credentials>;

    fn save(&self, credentials: &Credentials) -> Result<()>;

    fn clear(&self) -> Result<()>;

    /// Name of this storage backend.
    fn name(&self) -> &str {
        "unknown"
    }

    fn access_token(&self) -> Option<String> {
        self.load()
            .and_then(|c| c.access_token)
            .filter(|t| !t.is_empty())
    }

    fn refresh_token(&self) -> Option<String> {
        self.load()
            .and_then(|c| c.refresh_token)
            .filter(|t| !t.is_empty())
    }
}

/// Credentials held only for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    credentials: RwLock<Option<Credentials>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
