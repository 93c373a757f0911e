//! Authenticated session handling.
//!
//! [`SessionManager`] sits between API callers and the [`Transport`]: it
//! attaches the access token, recovers from an expired token by refreshing
//! it once for all concurrent callers, and drops the session when the
//! refresh token is no longer accepted.
//!
//! [`Transport`]: crate::transport::Transport

mod bootstrap;
mod endpoints;
mod interceptor;
mod manager;
mod refresh;
mod single_flight;

#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::SessionStatus;
pub use endpoints::AuthEndpoints;
pub use manager::{LogoutHook, SessionManager, SessionManagerBuilder};
pub use refresh::RefreshError;
pub use single_flight::SingleFlight;
