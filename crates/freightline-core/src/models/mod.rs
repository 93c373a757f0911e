//! Data models shared between the session layer and the application shell.

pub mod auth;

pub use auth::{AuthUser, LoginRequest, TokenResponse};
