//! REST API client module for the Freightline admin backend.
//!
//! This module provides the `ApiClient` for typed JSON calls against the
//! company, trip, invoice, driver and payroll endpoints. Every call goes
//! through the [`SessionManager`](crate::session::SessionManager), which
//! attaches the bearer token and recovers from expired access tokens.

pub mod client;
pub mod error;
pub mod request;

pub use client::{ApiClient, ApiVersion};
pub use error::ApiError;
pub use request::{ApiRequest, ApiResponse};
