//! Credential types and storage backends.
//!
//! This module provides:
//! - `Credentials`: access/refresh bearer token pair with an expiry hint
//! - `CredentialStore`: the storage seam read by the session manager
//! - `MemoryStore`, `FileStore`, `KeyringStore`: in-process, `session.json`
//!   in the cache directory, and OS keychain backends

pub mod credentials;
pub mod keyring;
pub mod session;

pub use self::keyring::KeyringStore;
pub use credentials::{CredentialStore, Credentials, MemoryStore};
pub use session::FileStore;
