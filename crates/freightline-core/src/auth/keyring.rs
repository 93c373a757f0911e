use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

use super::{CredentialStore, Credentials};

const SERVICE_NAME: &str = "freightline";

/// Refresh token in the OS keychain, access token in memory only.
///
/// After a restart only the refresh token is known, which is exactly what
/// session bootstrap needs to obtain a new access token.
pub struct KeyringStore {
    account: String,
    cached: RwLock<Option<Credentials>>,
}

impl KeyringStore {
    pub fn new(account: impl Into<String>) -> Self {
        let account = account.into();
        let cached = match Self::read_refresh_token(&account) {
            Ok(Some(refresh)) => Some(Credentials::new(None, Some(refresh))),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token from keychain");
                None
            }
        };
        debug!(account = %account, has_refresh = cached.is_some(), "Keyring store opened");
        Self {
            account,
            cached: RwLock::new(cached),
        }
    }

    fn entry(account: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")
    }

    fn read_refresh_token(account: &str) -> Result<Option<String>> {
        match Self::entry(account)?.get_password() {
            Ok(token) if !token.is_empty() => Ok(Some(token)),
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve refresh token from keychain"),
        }
    }

    fn delete_refresh_token(&self) -> Result<()> {
        match Self::entry(&self.account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete refresh token from keychain"),
        }
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self) -> Option<Credentials> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());

        match credentials.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            Some(refresh) => Self::entry(&self.account)?
                .set_password(refresh)
                .context("Failed to store refresh token in keychain"),
            None => self.delete_refresh_token(),
        }
    }

    fn clear(&self) -> Result<()> {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.delete_refresh_token()
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
