//! Authenticated HTTP session layer for the Freightline admin API.
//!
//! Build one [`SessionManager`] per process and share it (it is cheap to
//! clone). [`ApiClient`] adds typed JSON helpers on top of it for the v1 and
//! v2 API.
//!
//! ```no_run
//! use freightline_core::{ApiClient, ApiVersion, Config, SessionManager};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let session = SessionManager::from_config(&config)?
//!     .on_logout(|| eprintln!("Session expired, please log in again"))
//!     .build();
//! session.bootstrap().await;
//!
//! let client = ApiClient::for_version(session, &config, ApiVersion::V1);
//! let trips: serde_json::Value = client.get("/trips").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod session;
pub mod transport;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, ApiVersion};
pub use auth::{CredentialStore, Credentials};
pub use config::Config;
pub use models::AuthUser;
pub use session::{AuthEndpoints, RefreshError, SessionManager, SessionStatus};
pub use transport::{ReqwestTransport, Transport};
